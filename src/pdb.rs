//! # PDB Signature Extraction
//!
//! Computes the 16-byte identifier a symbol client uses to request a
//! debug-symbol file. Two incompatible formats exist and are tried in order:
//!
//! 1. **Portable PDB**: an ECMA-335 metadata root (`BSJB`) whose `#Pdb`
//!    stream starts with a 20-byte PDB id. The first 16 bytes are the GUID;
//!    the last 4 are a stamp that is not part of the signature.
//! 2. **Native PDB (MSF 7.00)**: a page-structured container. There is no
//!    usable documentation of the stream directory, so the GUID page is found
//!    heuristically by walking backward from the first directory page (see
//!    [`native_signature`]).
//!
//! ## Signature String
//!
//! The lookup key is the GUID rendered as 32 uppercase hex digits with no
//! separators, followed by the literal generation marker `1`:
//!
//! ```text
//! 0123456789ABCDEF0123456789ABCDEF1
//! ```
//!
//! The 16 bytes are encoded in the order they are stored in the file. Symbol
//! clients such as Visual Studio and `dotnet-symbol` render the GUID in field
//! order instead, with the first three groups (4, 2 and 2 bytes) byte-swapped,
//! so the keys produced here do not match the paths those clients request.
//! Stored bytes `00 11 22 33 44 55 66 77 ...` give `0011223344556677...1` here
//! but `3322110055447766...1` in a client request.
//!
//! Neither parser panics or errors on malformed input: each reports "not this
//! format" and the caller gets a single [`PdbFormatError`] if both decline.

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

// =============================================================================
// Portable PDB Constants
// =============================================================================

/// Metadata root signature (`"BSJB"` little-endian).
pub const PORTABLE_METADATA_MAGIC: u32 = 0x424A_5342;

/// Longest version string a metadata root may declare.
const PORTABLE_MAX_VERSION_LENGTH: u32 = 255;

/// Longest stream name, terminator and padding included.
const PORTABLE_MAX_STREAM_NAME: usize = 32;

/// Name of the stream that carries the PDB id.
pub const PORTABLE_PDB_STREAM: &str = "#Pdb";

/// Size of the PDB id at the start of the `#Pdb` stream.
pub const PORTABLE_PDB_ID_SIZE: usize = 20;

// =============================================================================
// Native PDB Constants
// =============================================================================

/// MSF 7.00 superblock magic.
pub const NATIVE_HEADER_MAGIC: &[u8; 32] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0\0";

/// First four bytes of the page that holds the PDB info stream header.
pub const NATIVE_PAGE_MAGIC: [u8; 4] = [0x94, 0x2E, 0x31, 0x01];

/// Bytes between the page magic and the GUID (signature and age fields).
const NATIVE_GUID_SKIP: i64 = 8;

/// Smallest page size an MSF file uses.
pub const NATIVE_MIN_PAGE_SIZE: i64 = 512;

/// Header fields between the page size and the must-be-zero field:
/// free page map, page count and directory size.
const NATIVE_UNUSED_HEADER_BYTES: i64 = 12;

/// Size of a GUID.
pub const GUID_SIZE: usize = 16;

/// Generation marker appended to every signature string.
pub const SIGNATURE_GENERATION: &str = "1";

/// Symbol data in neither PDB format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PdbFormatError {
    /// Neither the portable nor the native layout matched.
    #[error("failed to extract the symbol file signature")]
    Unrecognized,

    /// The file could not be read.
    #[error("failed to read symbol file: {0}")]
    Unreadable(String),
}

/// The GUID that identifies a debug-symbol file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdbSignature([u8; GUID_SIZE]);

impl PdbSignature {
    /// Wraps raw GUID bytes.
    pub fn from_bytes(bytes: [u8; GUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw GUID bytes.
    pub fn as_bytes(&self) -> &[u8; GUID_SIZE] {
        &self.0
    }
}

impl fmt::Display for PdbSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", hex::encode_upper(self.0), SIGNATURE_GENERATION)
    }
}

/// Computes the signature of a seekable symbol stream.
///
/// Parsing starts at the current position; the native layout is only tried
/// after rewinding to it.
pub fn signature_of<R: Read + Seek>(reader: &mut R) -> Result<PdbSignature, PdbFormatError> {
    let start = reader
        .stream_position()
        .map_err(|e| PdbFormatError::Unreadable(e.to_string()))?;

    if let Some(guid) = portable_signature(reader, start) {
        return Ok(PdbSignature(guid));
    }

    reader
        .seek(SeekFrom::Start(start))
        .map_err(|e| PdbFormatError::Unreadable(e.to_string()))?;

    native_signature(reader, start)
        .map(PdbSignature)
        .ok_or(PdbFormatError::Unrecognized)
}

/// Computes the signature of an in-memory symbol file.
pub fn signature_of_bytes(bytes: &[u8]) -> Result<PdbSignature, PdbFormatError> {
    signature_of(&mut Cursor::new(bytes))
}

/// Computes the signature of a symbol file on disk.
pub fn signature_of_file(path: &Path) -> Result<PdbSignature, PdbFormatError> {
    let file =
        std::fs::File::open(path).map_err(|e| PdbFormatError::Unreadable(e.to_string()))?;
    signature_of(&mut io::BufReader::new(file))
}

// =============================================================================
// Portable Format
// =============================================================================

/// Reads the PDB id from a portable PDB metadata root at `base`.
///
/// Layout (all little-endian):
///
/// ```text
/// u32 signature "BSJB"   u16 major   u16 minor   u32 reserved
/// u32 length             u8[length]  version string (padded to 4)
/// u16 flags              u16 streams
/// streams × { u32 offset, u32 size, NUL-terminated name padded to 4 }
/// ```
///
/// Stream offsets are relative to the start of the metadata root.
fn portable_signature<R: Read + Seek>(reader: &mut R, base: u64) -> Option<[u8; GUID_SIZE]> {
    if read_u32(reader).ok()? != PORTABLE_METADATA_MAGIC {
        return None;
    }
    // major, minor, reserved
    skip(reader, 8).ok()?;
    let version_length = read_u32(reader).ok()?;
    if version_length > PORTABLE_MAX_VERSION_LENGTH + 1 {
        return None;
    }
    skip(reader, i64::from(version_length)).ok()?;
    // flags
    skip(reader, 2).ok()?;
    let stream_count = read_u16(reader).ok()?;

    let mut pdb_stream = None;
    for _ in 0..stream_count {
        let offset = read_u32(reader).ok()?;
        let size = read_u32(reader).ok()?;
        let name = read_stream_name(reader)?;
        if name == PORTABLE_PDB_STREAM {
            pdb_stream = Some((offset, size));
        }
    }

    let (offset, size) = pdb_stream?;
    if (size as usize) < PORTABLE_PDB_ID_SIZE {
        return None;
    }
    reader
        .seek(SeekFrom::Start(base.checked_add(u64::from(offset))?))
        .ok()?;
    let mut id = [0u8; PORTABLE_PDB_ID_SIZE];
    reader.read_exact(&mut id).ok()?;

    let mut guid = [0u8; GUID_SIZE];
    guid.copy_from_slice(&id[..GUID_SIZE]);
    Some(guid)
}

/// Reads a NUL-terminated stream name and its padding to a 4-byte boundary.
fn read_stream_name<R: Read>(reader: &mut R) -> Option<String> {
    let mut name = Vec::new();
    let mut chunk = [0u8; 4];
    loop {
        reader.read_exact(&mut chunk).ok()?;
        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            name.extend_from_slice(&chunk[..nul]);
            break;
        }
        name.extend_from_slice(&chunk);
        if name.len() >= PORTABLE_MAX_STREAM_NAME {
            return None;
        }
    }
    String::from_utf8(name).ok()
}

// =============================================================================
// Native Format
// =============================================================================

/// Finds the GUID in a native (MSF 7.00) PDB.
///
/// Superblock after the 32-byte magic (little-endian `i32`s):
///
/// ```text
/// +32 page size
/// +36 free page map    \
/// +40 pages used        > not needed
/// +44 directory size   /
/// +48 must be zero
/// +52 first page of the directory page list
/// ```
///
/// The directory page list holds page numbers of "sub-directory" pages. The
/// PDB info stream header page is not referenced anywhere predictable, but in
/// every observed file it precedes the first sub-directory page and starts
/// with [`NATIVE_PAGE_MAGIC`]. So: seek to the page before the first
/// sub-directory page and walk backward one page at a time (never into the
/// superblock page) until a page starts with the magic. The GUID follows the
/// magic after an 8-byte gap.
///
/// Every page number read from the file must lie inside the stream, so the
/// walk visits at most one page per `NATIVE_MIN_PAGE_SIZE` bytes of input.
pub fn native_signature<R: Read + Seek>(reader: &mut R, base: u64) -> Option<[u8; GUID_SIZE]> {
    let end = reader.seek(SeekFrom::End(0)).ok()?;
    let length = i64::try_from(end.checked_sub(base)?).ok()?;
    seek_to(reader, base, 0)?;

    let mut magic = [0u8; 32];
    reader.read_exact(&mut magic).ok()?;
    if &magic != NATIVE_HEADER_MAGIC {
        return None;
    }

    let page_size = i64::from(read_i32(reader).ok()?);
    if page_size < NATIVE_MIN_PAGE_SIZE {
        return None;
    }
    skip(reader, NATIVE_UNUSED_HEADER_BYTES).ok()?;
    if read_i32(reader).ok()? != 0 {
        return None;
    }

    let first_directory_page = i64::from(read_i32(reader).ok()?);
    let directory_offset = first_directory_page.checked_mul(page_size)?;
    if directory_offset >= length {
        return None;
    }
    seek_to(reader, base, directory_offset)?;
    let first_subdirectory_page = i64::from(read_i32(reader).ok()?);
    if first_directory_page <= 1 {
        return None;
    }
    if first_subdirectory_page.checked_mul(page_size)? >= length {
        return None;
    }

    let last_page = (length - 1) / page_size * page_size;
    let mut position = first_subdirectory_page
        .checked_sub(1)?
        .checked_mul(page_size)?
        .min(last_page);
    let mut page_magic = [0u8; 4];
    while position >= page_size {
        seek_to(reader, base, position)?;
        if reader.read_exact(&mut page_magic).is_ok() && page_magic == NATIVE_PAGE_MAGIC {
            skip(reader, NATIVE_GUID_SKIP).ok()?;
            let mut guid = [0u8; GUID_SIZE];
            reader.read_exact(&mut guid).ok()?;
            return Some(guid);
        }
        position -= page_size;
    }
    None
}

// =============================================================================
// Readers
// =============================================================================

fn seek_to<R: Seek>(reader: &mut R, base: u64, offset: i64) -> Option<()> {
    let offset = u64::try_from(offset).ok()?;
    reader.seek(SeekFrom::Start(base.checked_add(offset)?)).ok()?;
    Some(())
}

fn skip<R: Seek>(reader: &mut R, bytes: i64) -> io::Result<u64> {
    reader.seek(SeekFrom::Current(bytes))
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_display() {
        let sig = PdbSignature::from_bytes([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(sig.to_string(), "0123456789ABCDEF0123456789ABCDEF1");
    }

    #[test]
    fn test_garbage_is_unrecognized() {
        assert_eq!(
            signature_of_bytes(b"definitely not a pdb"),
            Err(PdbFormatError::Unrecognized)
        );
        assert_eq!(signature_of_bytes(&[]), Err(PdbFormatError::Unrecognized));
    }

    #[test]
    fn test_stream_name_padding() {
        let mut cursor = Cursor::new(b"#Pdb\0\0\0\0#~\0\0".to_vec());
        assert_eq!(read_stream_name(&mut cursor).as_deref(), Some("#Pdb"));
        assert_eq!(read_stream_name(&mut cursor).as_deref(), Some("#~"));
    }
}
