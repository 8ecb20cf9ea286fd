//! Object id classification.
//!
//! Three id shapes exist in the bucket namespace:
//!
//! - **Domain**: a path-shaped name beginning with `/`, e.g. `/home/data.h5`.
//! - **UUID object**: `g-`, `d-` or `t-` followed by a canonical UUID,
//!   naming a group, dataset or datatype.
//! - **Chunk**: `c-` followed by the parent dataset's UUID, an underscore,
//!   and the chunk coordinates (`c-<uuid>_2_0`).
//!
//! Everything here is pure string inspection; no I/O.

use thiserror::Error;
use uuid::Uuid;

/// Byte offset of the coordinate suffix within a chunk id:
/// `c-` + 36-char dataset UUID + `_`.
const CHUNK_SUFFIX_OFFSET: usize = 39;

const UUID_LEN: usize = 36;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid object id `{0}`")]
    InvalidId(String),
}

/// Object kind named by a UUID id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Group,
    Datatype,
    Dataset,
}

impl ObjKind {
    /// Collection name used in store keys, manifests and DN request paths.
    pub fn collection(self) -> &'static str {
        match self {
            ObjKind::Group => "groups",
            ObjKind::Datatype => "datatypes",
            ObjKind::Dataset => "datasets",
        }
    }
}

/// Result of classifying an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdClass {
    Domain,
    Uuid(ObjKind),
    Chunk,
}

/// Classify `id` as a domain, UUID object or chunk.
pub fn classify(id: &str) -> Result<IdClass, IdError> {
    if is_valid_domain(id) {
        Ok(IdClass::Domain)
    } else if is_valid_chunk_id(id) {
        Ok(IdClass::Chunk)
    } else if is_valid_uuid(id) {
        kind_of(id).map(IdClass::Uuid)
    } else {
        Err(IdError::InvalidId(id.to_string()))
    }
}

/// True for path-shaped domain names: leading `/`, non-empty segments,
/// no trailing slash.
pub fn is_valid_domain(id: &str) -> bool {
    match id.strip_prefix('/') {
        Some(rest) => !rest.is_empty() && rest.split('/').all(|seg| !seg.is_empty()),
        None => false,
    }
}

/// True for `g-`/`d-`/`t-` ids carrying a canonical UUID.
pub fn is_valid_uuid(id: &str) -> bool {
    let (Some(prefix), Some(rest)) = (id.get(..2), id.get(2..)) else {
        return false;
    };
    matches!(prefix, "g-" | "d-" | "t-") && rest.len() == UUID_LEN && Uuid::parse_str(rest).is_ok()
}

/// True for chunk ids: `c-<dataset uuid>_<coord>[_<coord>...]`.
pub fn is_valid_chunk_id(id: &str) -> bool {
    if id.get(..2) != Some("c-") {
        return false;
    }
    let Some(uuid_part) = id.get(2..2 + UUID_LEN) else {
        return false;
    };
    if Uuid::parse_str(uuid_part).is_err() {
        return false;
    }
    if id.as_bytes().get(2 + UUID_LEN) != Some(&b'_') {
        return false;
    }
    let Some(suffix) = id.get(CHUNK_SUFFIX_OFFSET..) else {
        return false;
    };
    !suffix.is_empty()
        && suffix
            .split('_')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Kind of a UUID object id.
pub fn kind_of(id: &str) -> Result<ObjKind, IdError> {
    if !is_valid_uuid(id) {
        return Err(IdError::InvalidId(id.to_string()));
    }
    match id.get(..2) {
        Some("g-") => Ok(ObjKind::Group),
        Some("t-") => Ok(ObjKind::Datatype),
        Some("d-") => Ok(ObjKind::Dataset),
        _ => Err(IdError::InvalidId(id.to_string())),
    }
}

/// Collection name for any object id, `chunks` included.
pub fn collection_for(id: &str) -> Result<&'static str, IdError> {
    if is_valid_chunk_id(id) {
        Ok("chunks")
    } else {
        kind_of(id).map(ObjKind::collection)
    }
}

/// Id of the dataset a chunk belongs to.
pub fn dataset_of(chunk_id: &str) -> Result<String, IdError> {
    if !is_valid_chunk_id(chunk_id) {
        return Err(IdError::InvalidId(chunk_id.to_string()));
    }
    Ok(format!("d-{}", &chunk_id[2..2 + UUID_LEN]))
}

/// Coordinate part of a chunk id, with the dataset prefix removed.
pub fn chunk_suffix(chunk_id: &str) -> Result<&str, IdError> {
    if !is_valid_chunk_id(chunk_id) {
        return Err(IdError::InvalidId(chunk_id.to_string()));
    }
    Ok(&chunk_id[CHUNK_SUFFIX_OFFSET..])
}

/// Map an id to its object-store key.
///
/// Domains drop the leading slash; UUID and chunk ids are their own keys.
/// Bijective within the bucket namespace.
pub fn key_of(id: &str) -> Result<String, IdError> {
    match classify(id)? {
        IdClass::Domain => Ok(id[1..].to_string()),
        IdClass::Uuid(_) | IdClass::Chunk => Ok(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "g-12345678-1234-1234-1234-123456789abc";
    const DSET: &str = "d-87654321-4321-4321-4321-cba987654321";
    const CTYPE: &str = "t-12345678-1234-1234-1234-123456789abc";
    const CHUNK: &str = "c-87654321-4321-4321-4321-cba987654321_0_12";

    #[test]
    fn classifies_domains() {
        assert_eq!(classify("/home/data.h5"), Ok(IdClass::Domain));
        assert_eq!(classify("/d"), Ok(IdClass::Domain));
        assert!(classify("/").is_err());
        assert!(classify("/a//b").is_err());
        assert!(classify("/a/b/").is_err());
        assert!(classify("no-slash").is_err());
    }

    #[test]
    fn classifies_uuids() {
        assert_eq!(classify(GROUP), Ok(IdClass::Uuid(ObjKind::Group)));
        assert_eq!(classify(DSET), Ok(IdClass::Uuid(ObjKind::Dataset)));
        assert_eq!(classify(CTYPE), Ok(IdClass::Uuid(ObjKind::Datatype)));
        assert!(classify("x-12345678-1234-1234-1234-123456789abc").is_err());
        assert!(classify("g-12345678").is_err());
        assert!(classify("g-zzzzzzzz-1234-1234-1234-123456789abc").is_err());
    }

    #[test]
    fn classifies_chunks() {
        assert_eq!(classify(CHUNK), Ok(IdClass::Chunk));
        assert_eq!(
            classify("c-87654321-4321-4321-4321-cba987654321_0"),
            Ok(IdClass::Chunk)
        );
        // missing coordinates
        assert!(classify("c-87654321-4321-4321-4321-cba987654321_").is_err());
        assert!(classify("c-87654321-4321-4321-4321-cba987654321").is_err());
        // non-numeric coordinate
        assert!(classify("c-87654321-4321-4321-4321-cba987654321_a").is_err());
        assert!(classify("c-87654321-4321-4321-4321-cba987654321_0__1").is_err());
    }

    #[test]
    fn chunk_parent_and_suffix() {
        assert_eq!(dataset_of(CHUNK).as_deref(), Ok(DSET));
        assert_eq!(chunk_suffix(CHUNK), Ok("0_12"));
        assert!(dataset_of(GROUP).is_err());
    }

    #[test]
    fn keys_round_trip() {
        assert_eq!(key_of("/home/data.h5").as_deref(), Ok("home/data.h5"));
        assert_eq!(key_of(GROUP).as_deref(), Ok(GROUP));
        assert_eq!(key_of(CHUNK).as_deref(), Ok(CHUNK));
        assert!(key_of("bogus").is_err());
    }

    #[test]
    fn collections() {
        assert_eq!(collection_for(GROUP), Ok("groups"));
        assert_eq!(collection_for(DSET), Ok("datasets"));
        assert_eq!(collection_for(CTYPE), Ok("datatypes"));
        assert_eq!(collection_for(CHUNK), Ok("chunks"));
        assert!(collection_for("/domain").is_err());
    }
}
