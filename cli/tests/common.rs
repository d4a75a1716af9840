use ifhd::writer::WriterConfig;
use ifhd::Writer;

/// Builds a small two-stream fixture file for the CLI tests to exercise.
pub fn build_fixture(path: &std::path::Path) {
    let mut w = Writer::create(path, WriterConfig::default(), None).unwrap();
    w.set_stream_name(1, "cam0");
    w.set_stream_name(2, "imu0");
    w.write_chunk(1, b"frame-0", 0, 0).unwrap();
    w.write_chunk(2, b"\x01\x02\x03\x04", 500_000, 0).unwrap();
    w.write_chunk(1, b"frame-1", 1_000_000, 0).unwrap();
    w.get_extension_stream("notes", 1, 2, 3).unwrap();
    w.write_to_extension_stream("notes", b"hello").unwrap();
    w.close().unwrap();
}
