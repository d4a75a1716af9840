//! The pluggable serialization seam. Out of core scope for this crate:
//! this module only defines the trait objects and insertion-order registries
//! collaborators plug into. Nothing in [`crate::reader`] or [`crate::writer`]
//! calls through these traits — chunk payloads stay opaque `&[u8]`/`Vec<u8>`
//! on both sides, exactly as the core requires.
//!
//! Collaborators register by string stream-type id; a second registration of
//! the same id overwrites the first while preserving its original position.
//! Backed by a `Vec` plus a name index rather than a separate ordered-map
//! dependency (see DESIGN.md).

use std::any::Any;
use std::collections::HashMap;

/// Translates an out-of-band stream-type descriptor blob into a typed
/// representation a collaborator understands. Never invoked by this crate.
pub trait StreamTypeDeserializer: Send + Sync {
    fn deserialize_stream_type(&self, data: &[u8]) -> Box<dyn Any>;
}

/// Translates one chunk's opaque payload bytes into a typed sample, given the
/// stream type a prior [`StreamTypeDeserializer`] call produced.
pub trait SampleDeserializer: Send + Sync {
    fn deserialize_sample(&self, stream_type: &dyn Any, payload: &[u8]) -> Box<dyn Any>;
}

/// Constructs a typed sample object from its deserialized fields, as a
/// separate step from [`SampleDeserializer`] so factories can be shared
/// across multiple wire deserializers that produce the same sample type.
pub trait SampleFactory: Send + Sync {
    fn create_sample(&self) -> Box<dyn Any>;
}

/// Constructs a typed stream-type descriptor object, mirroring
/// [`SampleFactory`] for stream types rather than samples.
pub trait StreamTypeFactory: Send + Sync {
    fn create_stream_type(&self) -> Box<dyn Any>;
}

/// Translates a typed stream-type descriptor into the out-of-band bytes
/// stored in a stream's additional-info blob. Never invoked by this crate.
pub trait StreamTypeSerializer: Send + Sync {
    fn serialize_stream_type(&self, stream_type: &dyn Any) -> Vec<u8>;
}

/// Translates one typed sample into the opaque payload bytes handed to
/// [`crate::writer::Writer::write_chunk`].
pub trait SampleSerializer: Send + Sync {
    fn serialize_sample(&self, sample: &dyn Any) -> Vec<u8>;
}

/// Insertion-order registry of deserialization collaborators, keyed by the
/// string stream-type id carried in a stream's additional-info blob.
/// Registering the same id twice overwrites the earlier entry in place,
/// preserving its original position.
#[derive(Default)]
pub struct DeserializerRegistry {
    order: Vec<String>,
    stream_types: HashMap<String, Box<dyn StreamTypeDeserializer>>,
    samples: HashMap<String, Box<dyn SampleDeserializer>>,
    sample_factories: HashMap<String, Box<dyn SampleFactory>>,
    stream_type_factories: HashMap<String, Box<dyn StreamTypeFactory>>,
}

impl DeserializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn note_id(&mut self, id: &str) {
        if !self.order.iter().any(|existing| existing == id) {
            self.order.push(id.to_string());
        }
    }

    pub fn register_stream_type_deserializer(&mut self, id: impl Into<String>, d: Box<dyn StreamTypeDeserializer>) {
        let id = id.into();
        self.note_id(&id);
        self.stream_types.insert(id, d);
    }

    pub fn register_sample_deserializer(&mut self, id: impl Into<String>, d: Box<dyn SampleDeserializer>) {
        let id = id.into();
        self.note_id(&id);
        self.samples.insert(id, d);
    }

    pub fn register_sample_factory(&mut self, id: impl Into<String>, f: Box<dyn SampleFactory>) {
        let id = id.into();
        self.note_id(&id);
        self.sample_factories.insert(id, f);
    }

    pub fn register_stream_type_factory(&mut self, id: impl Into<String>, f: Box<dyn StreamTypeFactory>) {
        let id = id.into();
        self.note_id(&id);
        self.stream_type_factories.insert(id, f);
    }

    pub fn stream_type_deserializer(&self, id: &str) -> Option<&dyn StreamTypeDeserializer> {
        self.stream_types.get(id).map(|b| b.as_ref())
    }

    pub fn sample_deserializer(&self, id: &str) -> Option<&dyn SampleDeserializer> {
        self.samples.get(id).map(|b| b.as_ref())
    }

    pub fn sample_factory(&self, id: &str) -> Option<&dyn SampleFactory> {
        self.sample_factories.get(id).map(|b| b.as_ref())
    }

    pub fn stream_type_factory(&self, id: &str) -> Option<&dyn StreamTypeFactory> {
        self.stream_type_factories.get(id).map(|b| b.as_ref())
    }

    /// Registered ids, in the order they were first registered.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }
}

/// Insertion-order registry of serialization collaborators, keyed by the same
/// string stream-type id as [`DeserializerRegistry`].
#[derive(Default)]
pub struct SerializerRegistry {
    order: Vec<String>,
    stream_types: HashMap<String, Box<dyn StreamTypeSerializer>>,
    samples: HashMap<String, Box<dyn SampleSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn note_id(&mut self, id: &str) {
        if !self.order.iter().any(|existing| existing == id) {
            self.order.push(id.to_string());
        }
    }

    pub fn register_stream_type_serializer(&mut self, id: impl Into<String>, s: Box<dyn StreamTypeSerializer>) {
        let id = id.into();
        self.note_id(&id);
        self.stream_types.insert(id, s);
    }

    pub fn register_sample_serializer(&mut self, id: impl Into<String>, s: Box<dyn SampleSerializer>) {
        let id = id.into();
        self.note_id(&id);
        self.samples.insert(id, s);
    }

    pub fn stream_type_serializer(&self, id: &str) -> Option<&dyn StreamTypeSerializer> {
        self.stream_types.get(id).map(|b| b.as_ref())
    }

    pub fn sample_serializer(&self, id: &str) -> Option<&dyn SampleSerializer> {
        self.samples.get(id).map(|b| b.as_ref())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }
}
