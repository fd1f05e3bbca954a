//! Copying values across the domain boundary.
//!
//! Nothing crosses by reference. A value is encoded on the side it comes
//! from, its type name is resolved on the side it goes to, and an
//! independent copy is decoded there. Because owned names resolve to
//! different definitions in every domain, the copy is tagged with the
//! [`Code`] it was resolved under.

pub mod capture;
pub mod proxy;

pub use capture::{Field, FieldReader, FieldWriter, Primitive, Reconstruct};
pub use proxy::{BoundaryProxy, ExportTicket, Exportable, Interface, MethodTable};

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::trace;

use isolate_core::error::{MarshalError, Result};
use isolate_core::id::CodeId;
use isolate_core::types::Code;

use crate::namespace::NamespaceLoader;

/// A value that can be copied across the boundary.
///
/// Implemented for every serde type that is `Send + 'static`.
pub trait Portable: Serialize + DeserializeOwned + Send + 'static {
    /// The name resolved on both sides of the boundary.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T> Portable for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Which side of the boundary an operation happens on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// The host namespace.
    Host,

    /// The domain namespace.
    Domain,
}

/// Transport form of a value in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name the value is resolved under on arrival.
    pub type_name: String,

    /// Definition the value was encoded under.
    pub origin: CodeId,

    /// Encoded contents.
    pub body: Body,
}

/// Encoded contents of an [`Envelope`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// A whole serde value, packed as MessagePack.
    Packed(Vec<u8>),

    /// Captured fields of a [`Reconstruct`] value.
    Fields(Vec<Field>),
}

/// An independent copy of a value, tagged with the definition it was
/// resolved under on its current side.
pub struct Marshaled<T> {
    value: T,
    code: Arc<Code>,
}

impl<T> Marshaled<T> {
    pub(crate) fn new(value: T, code: Arc<Code>) -> Self {
        Self { value, code }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// The definition the value was resolved under.
    pub fn code(&self) -> &Arc<Code> {
        &self.code
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Marshaled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Marshaled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaled")
            .field("value", &self.value)
            .field("code", &self.code.to_string())
            .finish()
    }
}

/// Copies values between the host and one domain.
#[derive(Clone)]
pub struct Marshaler {
    loader: Arc<NamespaceLoader>,
}

impl Marshaler {
    /// Create a marshaler resolving domain-side names through `loader`.
    pub fn new(loader: Arc<NamespaceLoader>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &Arc<NamespaceLoader> {
        &self.loader
    }

    /// Resolve `name` on `side`.
    pub fn resolve(&self, name: &str, side: Side) -> Result<Arc<Code>> {
        match side {
            Side::Host => self.loader.host().resolve(name),
            Side::Domain => self.loader.resolve(name),
        }
    }

    /// Copy a host value into the domain.
    pub fn copy_into<T: Portable>(&self, value: &T) -> Result<Marshaled<T>> {
        let envelope = self.encode(value, Side::Host)?;
        self.decode(envelope, Side::Domain)
    }

    /// Copy a domain value out to the host.
    pub fn copy_out_of<T: Portable>(&self, value: &T) -> Result<Marshaled<T>> {
        let envelope = self.encode(value, Side::Domain)?;
        self.decode(envelope, Side::Host)
    }

    /// Copy a value with captured state into the domain, field by field.
    pub fn copy_captured_into<T: Reconstruct>(&self, value: &T) -> Result<Marshaled<T>> {
        let envelope = self.encode_captured(value, Side::Host)?;
        self.decode_captured(envelope, Side::Domain)
    }

    /// Encode `value` as seen from `side`.
    pub fn encode<T: Portable>(&self, value: &T, side: Side) -> Result<Envelope> {
        let type_name = T::type_name();
        let origin = self.resolve(type_name, side)?;
        let body = rmp_serde::to_vec_named(value).map_err(|e| MarshalError::Encode {
            type_name: type_name.to_string(),
            reason: e.to_string(),
        })?;
        trace!(type_name, ?side, "Encoded value");
        Ok(Envelope {
            type_name: type_name.to_string(),
            origin: origin.id(),
            body: Body::Packed(body),
        })
    }

    /// Decode an envelope into a fresh value on `side`.
    pub fn decode<T: Portable>(&self, envelope: Envelope, side: Side) -> Result<Marshaled<T>> {
        self.check_type(&envelope, T::type_name())?;
        let code = self.arrival_code(&envelope, side)?;
        let value = match envelope.body {
            Body::Packed(body) => rmp_serde::from_slice(&body).map_err(|e| MarshalError::Decode {
                type_name: envelope.type_name.clone(),
                reason: e.to_string(),
            })?,
            Body::Fields(_) => {
                return Err(MarshalError::Decode {
                    type_name: envelope.type_name,
                    reason: "expected a value, found captured fields".to_string(),
                }
                .into())
            }
        };
        Ok(Marshaled::new(value, code))
    }

    pub(crate) fn encode_captured<T: Reconstruct>(&self, value: &T, side: Side) -> Result<Envelope> {
        let type_name = T::type_name();
        let origin = self.resolve(type_name, side)?;
        let mut writer = FieldWriter::new(self, side);
        value.write_fields(&mut writer)?;
        Ok(Envelope {
            type_name: type_name.to_string(),
            origin: origin.id(),
            body: Body::Fields(writer.finish()),
        })
    }

    pub(crate) fn decode_captured<T: Reconstruct>(&self, envelope: Envelope, side: Side) -> Result<Marshaled<T>> {
        self.check_type(&envelope, T::type_name())?;
        let code = self.arrival_code(&envelope, side)?;
        let fields = match envelope.body {
            Body::Fields(fields) => fields,
            Body::Packed(_) => {
                return Err(MarshalError::Decode {
                    type_name: envelope.type_name,
                    reason: "expected captured fields, found a value".to_string(),
                }
                .into())
            }
        };
        let mut reader = FieldReader::new(self, side, T::type_name(), fields);
        let value = T::rebuild(&mut reader)?;
        Ok(Marshaled::new(value, code))
    }

    /// Fail with `TypeMismatch` unless `value` was resolved under `expected`.
    pub fn ensure_compatible<T>(&self, value: &Marshaled<T>, expected: &Code) -> Result<()> {
        if value.code().same_definition(expected) {
            Ok(())
        } else {
            Err(MarshalError::TypeMismatch {
                expected: expected.to_string(),
                actual: value.code().to_string(),
            }
            .into())
        }
    }

    fn check_type(&self, envelope: &Envelope, expected: &str) -> Result<()> {
        if envelope.type_name == expected {
            Ok(())
        } else {
            Err(MarshalError::TypeMismatch {
                expected: expected.to_string(),
                actual: envelope.type_name.clone(),
            }
            .into())
        }
    }

    /// Definition on the arrival side. Resolution is skipped when the
    /// domain already caches the very definition the value left under.
    fn arrival_code(&self, envelope: &Envelope, side: Side) -> Result<Arc<Code>> {
        if side == Side::Domain {
            if let Some(code) = self.loader.cached(&envelope.type_name) {
                if code.id() == envelope.origin {
                    return Ok(code);
                }
            }
        }
        self.resolve(&envelope.type_name, side)
    }
}
