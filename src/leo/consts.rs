//! Constants for the LEO compound container format

/// Magic bytes that should be at the beginning of every container
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Length of the signature check: magic followed by eight zero bytes
pub const SIGNATURE_LEN: usize = 16;

/// Size of the header block in bytes
pub const HEADER_SIZE: usize = 512;

/// Size of a big sector in bytes
pub const BIG_SECTOR_SIZE: usize = 512;

/// Size of a mini sector in bytes
pub const MINI_SECTOR_SIZE: usize = 64;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Directory records per big sector
pub const DIRENTRIES_PER_SECTOR: usize = BIG_SECTOR_SIZE / DIRENTRY_SIZE;

/// Allocation table entries per big sector
pub const ENTRIES_PER_SECTOR: usize = BIG_SECTOR_SIZE / 4;

/// Number of FAT sector locations carried inline in the header
pub const HEADER_DIFAT_LEN: usize = 109;

/// FAT sector locations per extra DIFAT sector (the last slot is the next pointer)
pub const DIFAT_ENTRIES_PER_SECTOR: usize = ENTRIES_PER_SECTOR - 1;

/// Default stream length at which content moves from the ministream to big sectors
pub const DEFAULT_MIN_STREAM_SIZE: u32 = 4096;

/// Sector shift written at 0x1E (2^9 = 512)
pub const SECTOR_SHIFT: u16 = 9;

/// Mini sector shift written at 0x20 (2^6 = 64)
pub const MINI_SECTOR_SHIFT: u16 = 6;

/// Minor version written into new headers
pub const MINOR_VERSION: u16 = 0x003E;

/// Major version for 512-byte sectors
pub const MAJOR_VERSION: u16 = 3;

/// Little-endian byte order mark
pub const BYTE_ORDER: u16 = 0xFFFE;

// Sector IDs
/// Unallocated sector
pub const FREESECT: i32 = -1;
/// End of a chain
pub const ENDOFCHAIN: i32 = -2;
/// Denotes a FAT sector in the FAT
pub const FATSECT: i32 = -3;
/// Denotes an extra DIFAT sector in the FAT
pub const DIFSECT: i32 = -4;

/// Directory link meaning "no entry"
pub const NOSTREAM: i32 = -1;

/// Name of the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Longest directory name in UTF-16 code units, excluding the terminator
pub const MAX_NAME_UNITS: usize = 31;

// Well-known storage names
/// Excel 97+ workbook stream
pub const WORKBOOK: &str = "Workbook";
/// Excel 5/95 workbook stream
pub const BOOK: &str = "Book";
/// Encrypted OOXML package stream
pub const ENCRYPTED_PACKAGE: &str = "EncryptedPackage";
/// Word document stream
pub const WORD_DOCUMENT: &str = "WordDocument";
/// Pivot cache storage
pub const PIVOT_CACHE: &str = "_SX_DB_CUR";
