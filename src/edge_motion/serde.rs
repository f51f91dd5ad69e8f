use std::fmt;

use serde::{Deserialize, Serialize, de};

use super::Edge;

impl Edge {
    fn parse(s: &str) -> Option<Self> {
        let mut edge = Edge::NONE;
        for part in s.split('|').map(str::trim) {
            if part == "NONE" {
                continue;
            }
            edge |= Edge::from_flag_name(part)?;
        }
        Some(edge)
    }

    fn names(self) -> String {
        if self.is_empty() {
            return "NONE".into();
        }
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join("|")
    }
}

struct NamedOrRawVisitor;

impl<'de> de::Visitor<'de> for NamedOrRawVisitor {
    type Value = Edge;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("`|`-separated edge names or raw edge bits")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Edge::parse(v).ok_or_else(|| E::custom(format!("invalid edge set '{v}'")))
    }

    fn visit_u8<E>(self, v: u8) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let edge = Edge::from_bits_truncate(v);
        if edge.bits() != v {
            return Err(E::invalid_value(
                de::Unexpected::Unsigned(v.into()),
                &"combination of edge bits",
            ));
        }
        Ok(edge)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let v: u8 = match v.try_into() {
            Ok(v) => v,
            Err(_) => {
                return Err(E::invalid_value(
                    de::Unexpected::Unsigned(v),
                    &"unsigned 8-bit value",
                ));
            }
        };
        self.visit_u8(v)
    }
}

/// Deserialization from raw bits or from flag names like `LEFT|TOP`.
impl<'a> Deserialize<'a> for Edge {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        if deserializer.is_human_readable() {
            // Human-readable formats are assumed to be self-describing.
            deserializer.deserialize_any(NamedOrRawVisitor)
        } else {
            let raw = u8::deserialize(deserializer)?;
            de::Visitor::visit_u8(NamedOrRawVisitor, raw)
        }
    }
}

impl Serialize for Edge {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.collect_str(&self.names())
        } else {
            self.bits().serialize(serializer)
        }
    }
}
