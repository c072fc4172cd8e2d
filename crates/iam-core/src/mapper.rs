//! Mapper between in-memory domain events and stored records.
//!
//! On write the event state is transcoded, then compressed, then encrypted.
//! On read the steps run in the strict inverse order. Both the cipher and
//! the compressor are optional.

use std::fmt;

use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{DomainEvent, ID_FIELD, VERSION_FIELD};
use crate::repository::{OutBox, StoredEvent};
use crate::topic::TopicResolver;
use crate::transcoder::{Fields, Transcoder, Value};

/// Symmetric encryption of stored payloads.
pub trait Cipher: Send + Sync {
    /// Encrypts a payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if encryption fails.
    fn encrypt(&self, plaintext: Vec<u8>) -> Result<Vec<u8>, DomainError>;

    /// Decrypts a payload produced by [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload is not authentic.
    fn decrypt(&self, ciphertext: Vec<u8>) -> Result<Vec<u8>, DomainError>;
}

/// Lossless compression of stored payloads.
pub trait Compressor: Send + Sync {
    /// Compresses a payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if compression fails.
    fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, DomainError>;

    /// Decompresses a payload produced by [`Compressor::compress`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the payload is corrupt.
    fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>, DomainError>;
}

/// Converts domain events to [`StoredEvent`] and [`OutBox`] records and back.
pub struct Mapper {
    transcoder: Transcoder,
    resolver: TopicResolver,
    cipher: Option<Box<dyn Cipher>>,
    compressor: Option<Box<dyn Compressor>>,
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("transcoder", &self.transcoder)
            .field("resolver", &self.resolver)
            .field("cipher", &self.cipher.is_some())
            .field("compressor", &self.compressor.is_some())
            .finish()
    }
}

impl Mapper {
    /// Creates a mapper without cipher or compressor.
    #[must_use]
    pub fn new(transcoder: Transcoder, resolver: TopicResolver) -> Self {
        Self {
            transcoder,
            resolver,
            cipher: None,
            compressor: None,
        }
    }

    /// Encrypts every payload with `cipher`.
    #[must_use]
    pub fn with_cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Some(Box::new(cipher));
        self
    }

    /// Compresses every payload with `compressor`.
    #[must_use]
    pub fn with_compressor(mut self, compressor: impl Compressor + 'static) -> Self {
        self.compressor = Some(Box::new(compressor));
        self
    }

    /// The transcoder used for payloads.
    #[must_use]
    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// The resolver used for topics.
    #[must_use]
    pub fn resolver(&self) -> &TopicResolver {
        &self.resolver
    }

    /// Converts an event to its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TopicResolution` for an unregistered event type
    /// and `DomainError::UnsupportedType` if a payload value cannot be
    /// transcoded.
    pub fn domain_event_to_stored(
        &self,
        event: &dyn DomainEvent,
    ) -> Result<StoredEvent, DomainError> {
        let topic = self.resolver.topic_of(event)?;
        let metadata = event.metadata();
        let state = self.seal(event_fields(event)?)?;
        Ok(StoredEvent {
            id: metadata.aggregate_id.to_string(),
            version: metadata.version,
            topic: topic.to_owned(),
            state,
        })
    }

    /// Rebuilds the event described by a stored record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TopicResolution` for an unknown topic and
    /// `DomainError::Transcoding` for a payload that does not match it.
    pub fn stored_to_domain_event(
        &self,
        stored: &StoredEvent,
    ) -> Result<Box<dyn DomainEvent>, DomainError> {
        let factory = self.resolver.resolve(&stored.topic)?;
        let mut fields = self.unseal(&stored.state)?;
        let id = match Uuid::parse_str(&stored.id) {
            Ok(id) => Value::from(id),
            Err(_) => Value::from(stored.id.as_str()),
        };
        fields.insert(ID_FIELD, id);
        fields.insert(VERSION_FIELD, stored.version);
        factory(fields)
    }

    /// Converts an event to a fresh, unprocessed outbox row.
    ///
    /// # Errors
    ///
    /// Same as [`Mapper::domain_event_to_stored`].
    pub fn domain_event_to_outbox(&self, event: &dyn DomainEvent) -> Result<OutBox, DomainError> {
        let topic = self.resolver.topic_of(event)?;
        let metadata = event.metadata();
        let mut fields = event_fields(event)?;
        fields.insert(VERSION_FIELD, metadata.version);
        Ok(OutBox {
            id: Uuid::new_v4(),
            aggregate_id: metadata.aggregate_id,
            topic: topic.to_owned(),
            state: self.seal(fields)?,
            processed: false,
        })
    }

    /// Rebuilds the event staged in an outbox row.
    ///
    /// # Errors
    ///
    /// Same as [`Mapper::stored_to_domain_event`].
    pub fn outbox_to_domain_event(
        &self,
        row: &OutBox,
    ) -> Result<Box<dyn DomainEvent>, DomainError> {
        let factory = self.resolver.resolve(&row.topic)?;
        let mut fields = self.unseal(&row.state)?;
        fields.insert(ID_FIELD, row.aggregate_id);
        factory(fields)
    }

    fn seal(&self, fields: Fields) -> Result<Vec<u8>, DomainError> {
        let mut state = self.transcoder.encode(&Value::from(fields))?;
        if let Some(compressor) = &self.compressor {
            state = compressor.compress(state)?;
        }
        if let Some(cipher) = &self.cipher {
            state = cipher.encrypt(state)?;
        }
        Ok(state)
    }

    fn unseal(&self, state: &[u8]) -> Result<Fields, DomainError> {
        let mut state = state.to_vec();
        if let Some(cipher) = &self.cipher {
            state = cipher.decrypt(state)?;
        }
        if let Some(compressor) = &self.compressor {
            state = compressor.decompress(state)?;
        }
        Fields::try_from(self.transcoder.decode(&state)?)
    }
}

fn event_fields(event: &dyn DomainEvent) -> Result<Fields, DomainError> {
    let mut fields = event.state();
    event.metadata().write_header(&mut fields)?;
    Ok(fields)
}
