//! Canonical binary codec.
//!
//! Every signed or persisted record is a CBOR (RFC 8949) map whose keys are
//! small unsigned integers. Field numbers are part of the wire contract and
//! must never be reused: a signature over a record is a signature over its
//! canonical bytes, so renumbering a field invalidates every existing file.
//!
//! Maps nested inside records are `BTreeMap`s, which makes the encoding of
//! structurally equal values byte-identical.
//!
//! Decoding fails closed. A record with an unknown, repeated or missing key
//! is rejected, and so is input left over after the record. Nested maps
//! declared `as UniqueMap<..>` reject repeated keys as well.

use crate::error::{Error, Result};
use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Default upper bound for a single encoded record (1 MiB).
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Encode a value into its canonical byte form.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)?;
    Ok(buf)
}

/// Decode a value from canonical bytes, bounded by [`MAX_RECORD_SIZE`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    decode_limited(bytes, MAX_RECORD_SIZE)
}

/// Decode a value, rejecting inputs larger than `max` before parsing.
pub fn decode_limited<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T> {
    if bytes.len() > max {
        return Err(Error::PayloadTooLarge {
            size: bytes.len(),
            max,
        });
    }
    let mut rest = bytes;
    let value = ciborium::de::from_reader(&mut rest)?;
    if !rest.is_empty() {
        return Err(Error::Deserialization(format!(
            "{} trailing bytes after record",
            rest.len()
        )));
    }
    Ok(value)
}

/// Deep copy through the codec: encode then decode.
///
/// The copy shares no memory with the source, whatever `T` contains.
pub fn deep_copy<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
    let bytes = canonicalize(value)?;
    decode_limited(&bytes, usize::MAX)
}

/// A `BTreeMap` whose decoding rejects repeated keys.
///
/// Serde's own map visitor keeps the last of two equal keys; record maps
/// must instead fail, so that no two byte strings decode to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueMap<K, V>(pub BTreeMap<K, V>);

impl<K, V> From<UniqueMap<K, V>> for BTreeMap<K, V> {
    fn from(map: UniqueMap<K, V>) -> Self {
        map.0
    }
}

impl<'de, K, V> Deserialize<'de> for UniqueMap<K, V>
where
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UniqueVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K, V> Visitor<'de> for UniqueVisitor<K, V>
        where
            K: Deserialize<'de> + Ord,
            V: Deserialize<'de>,
        {
            type Value = UniqueMap<K, V>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("map with unique keys")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                use serde::de::Error as _;

                let mut out = BTreeMap::new();
                while let Some((key, value)) = map.next_entry()? {
                    if out.contains_key(&key) {
                        return Err(A::Error::custom(format!(
                            "duplicate map key at position {}",
                            out.len()
                        )));
                    }
                    out.insert(key, value);
                }
                Ok(UniqueMap(out))
            }
        }

        deserializer.deserialize_map(UniqueVisitor(PhantomData))
    }
}

/// Implements `Serialize`/`Deserialize` for a struct as an integer-keyed map.
///
/// A field may name the type it is decoded through with `as`; the decoded
/// value is converted into the field type with `Into`.
///
/// ```ignore
/// int_keyed!(PublicKeyRecord {
///     1 => public_key: ByteBuf,
///     2 => status: StatusWindow,
/// });
///
/// int_keyed!(AuthnRecord {
///     1 => permissions: BTreeMap<String, PermissionGrant> as UniqueMap<String, PermissionGrant>,
///     2 => field: FieldDescriptor,
///     3 => status: StatusWindow,
/// });
/// ```
macro_rules! int_keyed {
    (@decode_as $ty:ty) => { $ty };
    (@decode_as $ty:ty, $via:ty) => { $via };
    (
        $name:ident $(< $($gen:ident),+ >)? {
            $($key:literal => $field:ident : $ty:ty $(as $via:ty)?),+ $(,)?
        }
    ) => {
        impl $(< $($gen),+ >)? ::serde::Serialize for $name $(< $($gen),+ >)?
        where
            $($ty: ::serde::Serialize,)+
        {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                use ::serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some([$($key),+].len()))?;
                $(map.serialize_entry(&($key as u8), &self.$field)?;)+
                map.end()
            }
        }

        impl<'de $($(, $gen)+)?> ::serde::Deserialize<'de> for $name $(< $($gen),+ >)?
        where
            $(int_keyed!(@decode_as $ty $(, $via)?): ::serde::Deserialize<'de>,)+
            $($ty: ::std::convert::From<int_keyed!(@decode_as $ty $(, $via)?)>,)+
        {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                struct FieldVisitor<T>(::std::marker::PhantomData<T>);

                impl<'de $($(, $gen)+)?> ::serde::de::Visitor<'de>
                    for FieldVisitor<$name $(< $($gen),+ >)?>
                where
                    $(int_keyed!(@decode_as $ty $(, $via)?): ::serde::Deserialize<'de>,)+
                    $($ty: ::std::convert::From<int_keyed!(@decode_as $ty $(, $via)?)>,)+
                {
                    type Value = $name $(< $($gen),+ >)?;

                    fn expecting(
                        &self,
                        formatter: &mut ::std::fmt::Formatter<'_>,
                    ) -> ::std::fmt::Result {
                        formatter.write_str(concat!(
                            "integer-keyed map for ",
                            stringify!($name)
                        ))
                    }

                    fn visit_map<A>(
                        self,
                        mut map: A,
                    ) -> ::std::result::Result<Self::Value, A::Error>
                    where
                        A: ::serde::de::MapAccess<'de>,
                    {
                        use ::serde::de::Error as _;

                        $(let mut $field: ::std::option::Option<$ty> = None;)+

                        while let Some(key) = map.next_key::<u8>()? {
                            match key {
                                $($key => {
                                    if $field.is_some() {
                                        return Err(A::Error::custom(format!(
                                            concat!("duplicate key {} in ", stringify!($name)),
                                            key
                                        )));
                                    }
                                    let decoded = map
                                        .next_value::<int_keyed!(@decode_as $ty $(, $via)?)>()?;
                                    $field = Some(decoded.into());
                                })+
                                other => {
                                    return Err(A::Error::custom(format!(
                                        concat!("unknown key {} in ", stringify!($name)),
                                        other
                                    )));
                                }
                            }
                        }

                        Ok($name {
                            $($field: $field.ok_or_else(|| {
                                A::Error::custom(concat!(
                                    "missing field ",
                                    stringify!($field),
                                    " in ",
                                    stringify!($name)
                                ))
                            })?,)+
                        })
                    }
                }

                deserializer.deserialize_map(FieldVisitor(::std::marker::PhantomData))
            }
        }
    };
}

pub(crate) use int_keyed;
