use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ddc_types::{BlobId, ContentHash, ContentId};

use crate::error::{ObjectError, ObjectResult};

const OBJECT_MAGIC: &[u8; 4] = b"DDCO";
const FORMAT_VERSION: u8 = 1;

/// Deepest nesting of inline arrays and objects accepted in a field value.
pub const MAX_NESTING: usize = 64;

/// Field holding the blob of an object built by [`DdcObject::wrap_blob`].
pub const RAW_HASH_FIELD: &str = "RawHash";
/// Field holding the blob size of an object built by [`DdcObject::wrap_blob`].
pub const RAW_SIZE_FIELD: &str = "RawSize";

/// A typed field value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<FieldValue>),
    /// Nested object stored inline (not an attachment).
    Object(Vec<Field>),
    /// Reference to a raw blob.
    BinaryAttachment(BlobId),
    /// Reference to another encoded object stored as a blob.
    ObjectAttachment(BlobId),
    /// Reference to logical, possibly chunked content.
    ContentIdAttachment(ContentId),
}

impl FieldValue {
    /// The attachment this value references, if it is one.
    pub fn as_attachment(&self) -> Option<Attachment> {
        match self {
            Self::BinaryAttachment(id) => Some(Attachment::Binary(*id)),
            Self::ObjectAttachment(id) => Some(Attachment::Object(*id)),
            Self::ContentIdAttachment(id) => Some(Attachment::Content(*id)),
            _ => None,
        }
    }

    fn collect_attachments(&self, out: &mut Vec<Attachment>) {
        match self {
            Self::Array(items) => items.iter().for_each(|v| v.collect_attachments(out)),
            Self::Object(fields) => fields.iter().for_each(|f| f.value.collect_attachments(out)),
            other => out.extend(other.as_attachment()),
        }
    }
}

/// A named field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Classification of an attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentKind {
    Binary,
    Object,
    ContentId,
}

/// A reference from an object to other content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attachment {
    Binary(BlobId),
    Object(BlobId),
    Content(ContentId),
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self {
            Self::Binary(_) => AttachmentKind::Binary,
            Self::Object(_) => AttachmentKind::Object,
            Self::Content(_) => AttachmentKind::ContentId,
        }
    }

    /// The hash this attachment points at.
    pub fn hash(&self) -> ContentHash {
        match self {
            Self::Binary(id) | Self::Object(id) => id.hash(),
            Self::Content(id) => id.hash(),
        }
    }
}

/// How a root object maps onto a single octet-stream response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadShape {
    /// No attachments: the object's own bytes are the payload.
    Inline,
    /// Exactly one binary attachment and nothing else: that blob is the payload.
    SingleBlob(BlobId),
    /// Anything else needs the structured multi-attachment format.
    Composite,
}

/// An immutable, hash-addressed document of named, typed fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DdcObject {
    fields: Vec<Field>,
}

impl DdcObject {
    /// Create an object from fields, in the given order.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Start building an object.
    pub fn builder() -> ObjectBuilder {
        ObjectBuilder::default()
    }

    /// The object wrapping a single uploaded blob.
    pub fn wrap_blob(id: BlobId, size: u64) -> Self {
        Self::builder()
            .binary_attachment(RAW_HASH_FIELD, id)
            .integer(RAW_SIZE_FIELD, size as i64)
            .build()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a top-level field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Every attachment in field order, including those nested in inline
    /// arrays and objects.
    pub fn attachments(&self) -> Vec<Attachment> {
        let mut out = Vec::new();
        for field in &self.fields {
            field.value.collect_attachments(&mut out);
        }
        out
    }

    pub fn payload_shape(&self) -> PayloadShape {
        match self.attachments().as_slice() {
            [] => PayloadShape::Inline,
            [Attachment::Binary(id)] => PayloadShape::SingleBlob(*id),
            _ => PayloadShape::Composite,
        }
    }

    /// Encode to the binary format.
    pub fn to_bytes(&self) -> ObjectResult<Vec<u8>> {
        encode_framed(OBJECT_MAGIC, &self.fields)
    }

    /// Decode from the binary format.
    ///
    /// Nesting is checked before the fields are materialized, so hostile
    /// input fails with [`ObjectError::TooDeep`] instead of exhausting the
    /// stack.
    pub fn from_bytes(data: &[u8]) -> ObjectResult<Self> {
        if data.starts_with(OBJECT_MAGIC) && data.get(OBJECT_MAGIC.len()) == Some(&FORMAT_VERSION) {
            check_nesting(&data[OBJECT_MAGIC.len() + 1..])?;
        }
        let fields = decode_framed(OBJECT_MAGIC, data)?;
        Ok(Self { fields })
    }

    /// The id this object is stored under: the hash of its encoding.
    pub fn id(&self) -> ObjectResult<BlobId> {
        Ok(BlobId::from_bytes(&self.to_bytes()?))
    }
}

/// Fluent construction of a [`DdcObject`].
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    fields: Vec<Field>,
}

impl ObjectBuilder {
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push(Field::new(name, value));
        self
    }

    pub fn bool(self, name: impl Into<String>, value: bool) -> Self {
        self.field(name, FieldValue::Bool(value))
    }

    pub fn integer(self, name: impl Into<String>, value: i64) -> Self {
        self.field(name, FieldValue::Integer(value))
    }

    pub fn string(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.field(name, FieldValue::String(value.into()))
    }

    pub fn bytes(self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.field(name, FieldValue::Bytes(value))
    }

    pub fn binary_attachment(self, name: impl Into<String>, id: BlobId) -> Self {
        self.field(name, FieldValue::BinaryAttachment(id))
    }

    pub fn object_attachment(self, name: impl Into<String>, id: BlobId) -> Self {
        self.field(name, FieldValue::ObjectAttachment(id))
    }

    pub fn content_attachment(self, name: impl Into<String>, id: ContentId) -> Self {
        self.field(name, FieldValue::ContentIdAttachment(id))
    }

    pub fn build(self) -> DdcObject {
        DdcObject {
            fields: self.fields,
        }
    }
}

pub(crate) fn encode_framed<T: Serialize + ?Sized>(
    magic: &[u8; 4],
    value: &T,
) -> ObjectResult<Vec<u8>> {
    let payload = bincode::serialize(value).map_err(|e| ObjectError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(magic.len() + 1 + payload.len());
    buf.extend_from_slice(magic);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub(crate) fn decode_framed<T: DeserializeOwned>(magic: &[u8; 4], data: &[u8]) -> ObjectResult<T> {
    if data.len() < magic.len() + 1 || &data[..magic.len()] != magic {
        let shown = &data[..data.len().min(magic.len())];
        return Err(ObjectError::InvalidMagic {
            expected: String::from_utf8_lossy(magic).into_owned(),
            actual: String::from_utf8_lossy(shown).into_owned(),
        });
    }
    let version = data[magic.len()];
    if version != FORMAT_VERSION {
        return Err(ObjectError::UnsupportedVersion(version));
    }
    bincode::deserialize(&data[magic.len() + 1..]).map_err(|e| ObjectError::Decode(e.to_string()))
}

/// Walks the encoded field list without recursion and fails once inline
/// arrays or objects nest deeper than [`MAX_NESTING`].
///
/// Mirrors the bincode layout of `Vec<Field>`: u64 lengths, u32 variant
/// tags, hashes as length-prefixed hex strings.
fn check_nesting(payload: &[u8]) -> ObjectResult<()> {
    enum Level {
        Fields(u64),
        Values(u64),
    }

    let mut reader = Scan { data: payload, pos: 0 };
    let mut stack = vec![Level::Fields(reader.u64()?)];
    while let Some(level) = stack.last_mut() {
        let in_fields = match level {
            Level::Fields(0) | Level::Values(0) => {
                stack.pop();
                continue;
            }
            Level::Fields(n) => {
                *n -= 1;
                true
            }
            Level::Values(n) => {
                *n -= 1;
                false
            }
        };
        if in_fields {
            reader.string()?;
        }
        let nested = match reader.u32()? {
            0 => None,
            1 => reader.skip(1).map(|_| None)?,
            2 | 3 => reader.skip(8).map(|_| None)?,
            4 | 5 | 8 | 9 | 10 => reader.string().map(|_| None)?,
            6 => Some(Level::Values(reader.u64()?)),
            7 => Some(Level::Fields(reader.u64()?)),
            tag => return Err(ObjectError::Decode(format!("unknown field tag {tag}"))),
        };
        if let Some(level) = nested {
            if stack.len() > MAX_NESTING {
                return Err(ObjectError::TooDeep(MAX_NESTING));
            }
            stack.push(level);
        }
    }
    Ok(())
}

struct Scan<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Scan<'_> {
    fn take(&mut self, n: usize) -> ObjectResult<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| ObjectError::Decode("unexpected end of object".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> ObjectResult<()> {
        self.take(n).map(|_| ())
    }

    fn u32(&mut self) -> ObjectResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> ObjectResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self) -> ObjectResult<()> {
        let len = usize::try_from(self.u64()?)
            .map_err(|_| ObjectError::Decode("length overflow".into()))?;
        self.skip(len)
    }
}
