//! Identifier newtypes shared by every component.
//!
//! Families and entries are identified by UUIDs (the entry id is chosen by
//! the client, per the uniqueness invariant in the data model); access
//! tokens are 32 lowercase hex characters, matching the wire contract the
//! operator surface promises.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub const MIN: Self = Self(Uuid::nil());
            pub const MAX: Self = Self(Uuid::max());

            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Encode for $name {
            fn encode<E: bincode::enc::Encoder>(
                &self,
                encoder: &mut E,
            ) -> Result<(), bincode::error::EncodeError> {
                self.0.into_bytes().encode(encoder)
            }
        }

        impl<Context> Decode<Context> for $name {
            fn decode<D: bincode::de::Decoder<Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, bincode::error::DecodeError> {
                let bytes: [u8; 16] = Decode::decode(decoder)?;
                Ok(Self(Uuid::from_bytes(bytes)))
            }
        }

        impl<'de, Context> bincode::BorrowDecode<'de, Context> for $name {
            fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
                decoder: &mut D,
            ) -> Result<Self, bincode::error::DecodeError> {
                let bytes: [u8; 16] = bincode::BorrowDecode::borrow_decode(decoder)?;
                Ok(Self(Uuid::from_bytes(bytes)))
            }
        }
    };
}

uuid_newtype! {
    /// A family (tenant) id.
    FamilyId
}

uuid_newtype! {
    /// A client-chosen entry id.
    EntryId
}

/// A 32-lowercase-hex-character access-link token value.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct AccessTokenValue([u8; 16]);

#[derive(Debug, Snafu)]
pub enum AccessTokenParseError {
    #[snafu(display("access token must be exactly 32 hex characters"))]
    WrongLength,
    #[snafu(display("access token is not valid hex"))]
    InvalidHex,
}

impl AccessTokenValue {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::Rng::fill(&mut rand::rng(), &mut bytes);
        Self(bytes)
    }
}

impl fmt::Display for AccessTokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for AccessTokenValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessTokenValue({self})")
    }
}

impl FromStr for AccessTokenValue {
    type Err = AccessTokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(AccessTokenParseError::WrongLength);
        }
        let decoded = data_encoding::HEXLOWER_PERMISSIVE
            .decode(s.as_bytes())
            .map_err(|_| AccessTokenParseError::InvalidHex)?;
        let bytes: [u8; 16] = decoded
            .try_into()
            .map_err(|_| AccessTokenParseError::WrongLength)?;
        Ok(Self(bytes))
    }
}

impl Serialize for AccessTokenValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccessTokenValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_display_and_parse() {
        let token = AccessTokenValue::generate();
        let s = token.to_string();
        assert_eq!(s.len(), 32);
        let parsed: AccessTokenValue = s.parse().unwrap();
        assert_eq!(token, parsed);
    }

    #[test]
    fn family_id_round_trips_through_json() {
        let id = FamilyId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: FamilyId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
