//! Serde support for fixed-size identifiers.
//!
//! Human-readable formats (JSON, TOML) carry the textual form; binary formats
//! carry the raw bytes.

macro_rules! impl_readable_bytes_serde {
    ($name:ident, $len:expr, $to_text:path, $from_text:path) => {
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&$to_text(self))
                } else {
                    serde::Serialize::serialize(&self.0, serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                    $from_text(&text).map_err(serde::de::Error::custom)
                } else {
                    let bytes = <[u8; $len] as serde::Deserialize>::deserialize(deserializer)?;
                    Ok($name(bytes))
                }
            }
        }
    };
}
