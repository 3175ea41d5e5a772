// JSON codec shared by futures, queries and signal payloads.
use serde::{Serialize, de::DeserializeOwned};

pub(crate) trait Codec {
    fn encode<T: Serialize>(v: &T) -> Result<String, String>;
    fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    fn to_value<T: Serialize>(v: &T) -> Result<serde_json::Value, String>;
    fn from_value<T: DeserializeOwned>(v: serde_json::Value) -> Result<T, String>;
}

pub(crate) struct Json;

impl Codec for Json {
    fn encode<T: Serialize>(v: &T) -> Result<String, String> {
        serde_json::to_string(v).map_err(|e| e.to_string())
    }
    fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
        serde_json::from_str::<T>(s).map_err(|e| e.to_string())
    }
    fn to_value<T: Serialize>(v: &T) -> Result<serde_json::Value, String> {
        serde_json::to_value(v).map_err(|e| e.to_string())
    }
    fn from_value<T: DeserializeOwned>(v: serde_json::Value) -> Result<T, String> {
        serde_json::from_value(v).map_err(|e| e.to_string())
    }
}
