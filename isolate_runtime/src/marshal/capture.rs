//! Field-by-field copying for values that capture state.
//!
//! Closure-like task values often hold a link back to whatever created
//! them alongside the state they actually use. Such values implement
//! [`Reconstruct`]: they list their fields, each portable field is copied
//! on its own, enclosing links are dropped, and the value is rebuilt on
//! the other side from the copied fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use isolate_core::error::{MarshalError, Result};

use super::{Envelope, Marshaler, Portable, Side};

/// One captured field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// A copied field.
    Value { name: String, envelope: Envelope },

    /// A link to an enclosing instance; never copied.
    Enclosing { name: String },
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Self::Value { name, .. } | Self::Enclosing { name } => name,
        }
    }
}

/// A value copied across the boundary by its fields.
///
/// # Examples
///
/// ```
/// use isolate_runtime::marshal::{FieldReader, FieldWriter, Reconstruct};
/// use isolate_core::Result;
///
/// struct Tally {
///     label: String,
///     step: u32,
/// }
///
/// impl Reconstruct for Tally {
///     fn write_fields(&self, out: &mut FieldWriter<'_>) -> Result<()> {
///         out.value("label", &self.label)?;
///         out.value("step", &self.step)?;
///         Ok(())
///     }
///
///     fn rebuild(fields: &mut FieldReader<'_>) -> Result<Self> {
///         Ok(Self {
///             label: fields.value("label")?,
///             step: fields.primitive("step")?,
///         })
///     }
/// }
/// ```
pub trait Reconstruct: Send + Sized + 'static {
    /// The name resolved on both sides of the boundary.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Describe the fields to copy.
    fn write_fields(&self, out: &mut FieldWriter<'_>) -> Result<()>;

    /// Rebuild a value from copied fields.
    fn rebuild(fields: &mut FieldReader<'_>) -> Result<Self>;
}

/// Primitive field types, zero-initialized when missing.
pub trait Primitive: Portable + Default {}

macro_rules! primitive {
    ($($ty:ty),* $(,)?) => {
        $(impl Primitive for $ty {})*
    };
}

primitive!(bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

/// Collects the fields of a value being copied.
pub struct FieldWriter<'a> {
    marshaler: &'a Marshaler,
    side: Side,
    fields: Vec<Field>,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(marshaler: &'a Marshaler, side: Side) -> Self {
        Self {
            marshaler,
            side,
            fields: Vec::new(),
        }
    }

    /// Copy a portable field.
    pub fn value<V: Portable>(&mut self, name: &str, value: &V) -> Result<&mut Self> {
        let envelope = self.marshaler.encode(value, self.side)?;
        self.fields.push(Field::Value {
            name: name.to_string(),
            envelope,
        });
        Ok(self)
    }

    /// Copy a field that itself captures state.
    pub fn captured<V: Reconstruct>(&mut self, name: &str, value: &V) -> Result<&mut Self> {
        let envelope = self.marshaler.encode_captured(value, self.side)?;
        self.fields.push(Field::Value {
            name: name.to_string(),
            envelope,
        });
        Ok(self)
    }

    /// Note a link to an enclosing instance. It is not copied.
    pub fn enclosing(&mut self, name: &str) -> &mut Self {
        self.fields.push(Field::Enclosing { name: name.to_string() });
        self
    }

    pub(crate) fn finish(self) -> Vec<Field> {
        self.fields
    }
}

/// Supplies copied fields while a value is rebuilt.
pub struct FieldReader<'a> {
    marshaler: &'a Marshaler,
    side: Side,
    type_name: &'static str,
    fields: HashMap<String, Envelope>,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(marshaler: &'a Marshaler, side: Side, type_name: &'static str, fields: Vec<Field>) -> Self {
        let fields = fields
            .into_iter()
            .filter_map(|field| match field {
                Field::Value { name, envelope } => Some((name, envelope)),
                Field::Enclosing { .. } => None,
            })
            .collect();
        Self {
            marshaler,
            side,
            type_name,
            fields,
        }
    }

    /// Take a copied field. Fails with `MissingField` if it was not captured.
    pub fn value<V: Portable>(&mut self, name: &str) -> Result<V> {
        let envelope = self.take(name)?;
        Ok(self.marshaler.decode::<V>(envelope, self.side)?.into_inner())
    }

    /// Take a primitive field, or its zero value if it was not captured.
    pub fn primitive<P: Primitive>(&mut self, name: &str) -> Result<P> {
        match self.fields.remove(name) {
            Some(envelope) => Ok(self.marshaler.decode::<P>(envelope, self.side)?.into_inner()),
            None => Ok(P::default()),
        }
    }

    /// Take a field that itself captured state.
    pub fn captured<V: Reconstruct>(&mut self, name: &str) -> Result<V> {
        let envelope = self.take(name)?;
        Ok(self.marshaler.decode_captured::<V>(envelope, self.side)?.into_inner())
    }

    /// Whether a copied field called `name` is left.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn take(&mut self, name: &str) -> Result<Envelope> {
        self.fields.remove(name).ok_or_else(|| {
            MarshalError::MissingField {
                type_name: self.type_name.to_string(),
                field: name.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{HostNamespace, LoaderPolicy, NamespaceLoader};
    use isolate_core::id::DomainId;
    use std::sync::mpsc;
    use std::sync::Arc;

    struct Scaled {
        parent: Option<mpsc::Sender<u32>>,
        factor: u32,
        offset: i64,
        tags: Vec<String>,
    }

    impl Reconstruct for Scaled {
        fn write_fields(&self, out: &mut FieldWriter<'_>) -> Result<()> {
            out.enclosing("parent");
            out.value("factor", &self.factor)?;
            out.value("tags", &self.tags)?;
            Ok(())
        }

        fn rebuild(fields: &mut FieldReader<'_>) -> Result<Self> {
            Ok(Self {
                parent: None,
                factor: fields.primitive("factor")?,
                offset: fields.primitive("offset")?,
                tags: fields.value("tags")?,
            })
        }
    }

    fn marshaler() -> Marshaler {
        let loader = NamespaceLoader::new(
            DomainId::new(),
            "alpha",
            Arc::new(HostNamespace::new()),
            LoaderPolicy::default(),
        );
        Marshaler::new(Arc::new(loader))
    }

    #[test]
    fn test_captured_copy_skips_enclosing_and_zero_fills() {
        let (tx, _rx) = mpsc::channel();
        let original = Scaled {
            parent: Some(tx),
            factor: 3,
            offset: 99,
            tags: vec!["x".into()],
        };
        let copy = marshaler().copy_captured_into(&original).unwrap().into_inner();
        assert!(copy.parent.is_none());
        assert_eq!(copy.factor, 3);
        assert_eq!(copy.offset, 0);
        assert_eq!(copy.tags, vec!["x".to_string()]);
    }

    #[derive(Debug)]
    struct NeedsName;

    impl Reconstruct for NeedsName {
        fn write_fields(&self, _out: &mut FieldWriter<'_>) -> Result<()> {
            Ok(())
        }

        fn rebuild(fields: &mut FieldReader<'_>) -> Result<Self> {
            let _: String = fields.value("name")?;
            Ok(Self)
        }
    }

    #[test]
    fn test_missing_non_primitive_field() {
        let err = marshaler().copy_captured_into(&NeedsName).unwrap_err();
        assert!(matches!(
            err,
            isolate_core::Error::Marshal(MarshalError::MissingField { .. })
        ));
    }
}
