//! Fixed-width tuples and their schemas.
//!
//! Every tuple of a given [`TupleDesc`] serializes to exactly [`TupleDesc::size`] bytes, which
//! is what lets a heap page divide its body into equal slots.

use std::{fmt::Display, sync::Arc};

use crate::{
    error::{DbError, Result},
    RecordId,
};

/// Maximum number of bytes stored for a string field
pub const STRING_LEN: usize = 128;

const INT_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    Str,
}

impl FieldType {
    /// Serialized width of a field of this type
    pub fn byte_len(&self) -> usize {
        match self {
            FieldType::Int => INT_BYTES,
            FieldType::Str => INT_BYTES + STRING_LEN,
        }
    }

    /// Decode one field of this type from the front of `bytes`
    pub fn parse(&self, bytes: &[u8]) -> Result<Field> {
        if bytes.len() < self.byte_len() {
            return Err(DbError::Corrupt {
                detail: format!("need {} bytes for {:?}, got {}", self.byte_len(), self, bytes.len()),
            });
        }
        let mut int_bytes = [0u8; INT_BYTES];
        int_bytes.copy_from_slice(&bytes[..INT_BYTES]);
        match self {
            FieldType::Int => Ok(Field::Int(i32::from_be_bytes(int_bytes))),
            FieldType::Str => {
                let length = u32::from_be_bytes(int_bytes) as usize;
                if length > STRING_LEN {
                    return Err(DbError::Corrupt {
                        detail: format!("string length {length} exceeds {STRING_LEN}"),
                    });
                }
                let raw = &bytes[INT_BYTES..INT_BYTES + length];
                let value = String::from_utf8(raw.to_vec()).map_err(|e| DbError::Corrupt {
                    detail: format!("string field is not utf-8: {e}"),
                })?;
                Ok(Field::Str(value))
            }
        }
    }
}

impl std::str::FromStr for FieldType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(FieldType::Int),
            "str" | "string" => Ok(FieldType::Str),
            other => Err(DbError::SchemaMismatch {
                detail: format!("unknown field type '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Write this field into `out`, which must be exactly `field_type().byte_len()` bytes
    fn write_to(&self, out: &mut [u8]) {
        match self {
            Field::Int(value) => out.copy_from_slice(&value.to_be_bytes()),
            Field::Str(value) => {
                let mut end = value.len().min(STRING_LEN);
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                let bytes = &value.as_bytes()[..end];
                out[..INT_BYTES].copy_from_slice(&(bytes.len() as u32).to_be_bytes());
                out[INT_BYTES..INT_BYTES + bytes.len()].copy_from_slice(bytes);
                out[INT_BYTES + bytes.len()..].fill(0);
            }
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(value) => write!(f, "{value}"),
            Field::Str(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone)]
struct TdItem {
    field_type: FieldType,
    name: Option<String>,
}

/// The schema of a tuple: an ordered list of typed, optionally named fields
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: &[FieldType]) -> Self {
        Self {
            items: types
                .iter()
                .map(|&field_type| TdItem {
                    field_type,
                    name: None,
                })
                .collect(),
        }
    }

    pub fn with_names(types: &[FieldType], names: &[&str]) -> Result<Self> {
        if types.len() != names.len() {
            return Err(DbError::SchemaMismatch {
                detail: format!("{} types but {} names", types.len(), names.len()),
            });
        }
        Ok(Self {
            items: types
                .iter()
                .zip(names)
                .map(|(&field_type, name)| TdItem {
                    field_type,
                    name: Some(name.to_string()),
                })
                .collect(),
        })
    }

    /// Parse a comma separated list of types such as `int,int,str`
    pub fn parse(schema: &str) -> Result<Self> {
        let types = schema
            .split(',')
            .map(str::parse)
            .collect::<Result<Vec<FieldType>>>()?;
        if types.is_empty() {
            return Err(DbError::SchemaMismatch {
                detail: "schema needs at least one field".to_string(),
            });
        }
        Ok(Self::new(&types))
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// Serialized size in bytes of one tuple with this schema
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_len()).sum()
    }

    pub fn merge(first: &TupleDesc, second: &TupleDesc) -> TupleDesc {
        TupleDesc {
            items: first.items.iter().chain(&second.items).cloned().collect(),
        }
    }

    fn field_types(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.items.iter().map(|item| item.field_type)
    }
}

/// Two schemas are equal when their field types match position by position
impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.field_types().eq(other.field_types())
    }
}

impl Eq for TupleDesc {}

impl Display for TupleDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .items
            .iter()
            .map(|item| match &item.name {
                Some(name) => format!("{:?}({name})", item.field_type),
                None => format!("{:?}", item.field_type),
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A row of fields conforming to a [`TupleDesc`], optionally located on disk by a [`RecordId`]
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::SchemaMismatch {
                detail: format!(
                    "schema has {} fields, tuple has {}",
                    desc.num_fields(),
                    fields.len()
                ),
            });
        }
        for (i, (field, expected)) in fields.iter().zip(desc.field_types()).enumerate() {
            if field.field_type() != expected {
                return Err(DbError::SchemaMismatch {
                    detail: format!("field {i} is {:?}, expected {expected:?}", field.field_type()),
                });
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> Result<()> {
        match self.desc.field_type(i) {
            Some(expected) if expected == field.field_type() => {
                self.fields[i] = field;
                Ok(())
            }
            Some(expected) => Err(DbError::SchemaMismatch {
                detail: format!("field {i} is {expected:?}, got {:?}", field.field_type()),
            }),
            None => Err(DbError::SchemaMismatch {
                detail: format!("no field {i} in a schema of {}", self.desc.num_fields()),
            }),
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Concatenate two tuples into one with the merged schema
    pub fn merge(first: &Tuple, second: &Tuple) -> Tuple {
        Tuple {
            desc: Arc::new(TupleDesc::merge(&first.desc, &second.desc)),
            fields: first.fields.iter().chain(&second.fields).cloned().collect(),
            record_id: None,
        }
    }

    /// Serialize into `out`, which must be exactly `desc().size()` bytes long
    pub(crate) fn write_to(&self, out: &mut [u8]) {
        let mut offset = 0;
        for field in &self.fields {
            let len = field.field_type().byte_len();
            field.write_to(&mut out[offset..offset + len]);
            offset += len;
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.desc.size()];
        self.write_to(&mut out);
        out
    }

    pub fn from_bytes(desc: Arc<TupleDesc>, bytes: &[u8]) -> Result<Self> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for field_type in desc.field_types() {
            let end = offset + field_type.byte_len();
            let chunk = bytes.get(offset..end).ok_or_else(|| DbError::Corrupt {
                detail: format!("tuple truncated at byte {offset}"),
            })?;
            fields.push(field_type.parse(chunk)?);
            offset = end;
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }
}

/// Tuples compare by field values only
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for field in &self.fields {
            write!(f, "{field}\t")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tuple_tests {
    use std::sync::Arc;

    use super::{Field, FieldType, Tuple, TupleDesc, STRING_LEN};
    use crate::DbError;

    fn int_str_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(&[FieldType::Int, FieldType::Str]))
    }

    #[test]
    fn test_desc_size() {
        let desc = int_str_desc();
        assert_eq!(desc.size(), 4 + 4 + STRING_LEN);
        assert_eq!(TupleDesc::parse("int,int,int").unwrap().size(), 12);
    }

    #[test]
    fn test_desc_names_and_merge() {
        let left = TupleDesc::with_names(&[FieldType::Int], &["id"]).unwrap();
        let right = TupleDesc::with_names(&[FieldType::Str], &["name"]).unwrap();
        let merged = TupleDesc::merge(&left, &right);
        assert_eq!(merged.num_fields(), 2);
        assert_eq!(merged.field_index("name"), Some(1));
        assert_eq!(merged.field_index("missing"), None);
        assert_eq!(merged, *int_str_desc());
        assert!(TupleDesc::with_names(&[FieldType::Int], &[]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(matches!(
            TupleDesc::parse("int,float"),
            Err(DbError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_tuple_bytes_layout() {
        let tuple = Tuple::new(
            int_str_desc(),
            vec![Field::Int(-2), Field::Str("abc".to_string())],
        )
        .unwrap();
        let bytes = tuple.to_bytes();
        assert_eq!(bytes.len(), 4 + 4 + STRING_LEN);
        assert_eq!(&bytes[0..4], &(-2i32).to_be_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_be_bytes());
        assert_eq!(&bytes[8..11], b"abc");
        assert!(bytes[11..].iter().all(|&b| b == 0));

        let decoded = Tuple::from_bytes(int_str_desc(), &bytes).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn test_long_strings_are_truncated() {
        let long = "x".repeat(STRING_LEN + 20);
        let tuple = Tuple::new(int_str_desc(), vec![Field::Int(1), Field::Str(long)]).unwrap();
        let decoded = Tuple::from_bytes(int_str_desc(), &tuple.to_bytes()).unwrap();
        assert_eq!(decoded.field(1), Some(&Field::Str("x".repeat(STRING_LEN))));
    }

    #[test]
    fn test_type_checks() {
        assert!(Tuple::new(int_str_desc(), vec![Field::Int(1)]).is_err());
        assert!(Tuple::new(int_str_desc(), vec![Field::Int(1), Field::Int(2)]).is_err());

        let mut tuple = Tuple::new(
            int_str_desc(),
            vec![Field::Int(1), Field::Str(String::new())],
        )
        .unwrap();
        tuple.set_field(0, Field::Int(9)).unwrap();
        assert_eq!(tuple.field(0), Some(&Field::Int(9)));
        assert!(tuple.set_field(1, Field::Int(9)).is_err());
        assert!(tuple.set_field(5, Field::Int(9)).is_err());
    }

    #[test]
    fn test_corrupt_string_length() {
        let mut bytes = vec![0u8; int_str_desc().size()];
        bytes[4..8].copy_from_slice(&(STRING_LEN as u32 + 1).to_be_bytes());
        assert!(matches!(
            Tuple::from_bytes(int_str_desc(), &bytes),
            Err(DbError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_display() {
        let tuple = Tuple::new(
            int_str_desc(),
            vec![Field::Int(7), Field::Str("seven".to_string())],
        )
        .unwrap();
        assert_eq!(tuple.to_string(), "7\tseven\t\n");
    }
}
