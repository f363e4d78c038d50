use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Weight of a value as carried on the wire: the length of its JSON encoding
/// without the structural characters `[ ] , " { }`.
pub fn serialized_size<T: Serialize + ?Sized>(value: &T) -> Result<u64> {
    let json = serde_json::to_string(value)?;
    let size = json
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ',' | '"' | '{' | '}'))
        .count();
    Ok(size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct TestData {
        id: u64,
        name: String,
        values: Vec<i32>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = TestData {
            id: 42,
            name: "test".to_string(),
            values: vec![1, 2, 3, 4, 5],
        };

        let serialized = serialize(&original).expect("Serialization should work");
        let deserialized: TestData = deserialize(&serialized).expect("Deserialization should work");

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<TestData> = deserialize(&invalid_bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialized_size_strips_structure() {
        let mut map = BTreeMap::new();
        map.insert("ab", "cd");
        // {"ab":"cd"} -> ab:cd
        assert_eq!(serialized_size(&map).unwrap(), 5);
        assert_eq!(serialized_size(&Vec::<u8>::new()).unwrap(), 0);
        // [1,2] -> 12
        assert_eq!(serialized_size(&vec![1, 2]).unwrap(), 2);
    }
}
