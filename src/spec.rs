//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`write`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [_Zip Files: History, Explanation and Implementation_]
//! is also a fantastic resource and a great read.
//!
//! [`write`]: ../write/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT
//! [_Zip Files: History, Explanation and Implementation_]: https://www.hanshq.net/zip.html

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::result::*;
use crate::width::*;
use crate::write::{CompressionMethod, FileRecord};

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];
/// Data descriptor magic number
pub const DATA_DESCRIPTOR_MAGIC: [u8; 4] = [b'P', b'K', 7, 8];

/// "Version needed to extract" for anything using DEFLATE.
///
/// We also use it for "version made by", whose upper byte of zero
/// claims MS-DOS attributes. That's fine, since we leave them all zeroed.
pub const VERSION: u16 = 20;

/// General purpose flag bit 3:
///
/// If this bit is set, the fields crc-32, compressed
/// size and uncompressed size are set to zero in the
/// local header.  The correct values are put in the
/// data descriptor immediately following the compressed
/// data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

impl CompressionMethod {
    pub(crate) fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// Appends a little-endian u32 to the provided buffer.
fn write_u32(output: &mut Vec<u8>, u: u32) {
    output.extend_from_slice(&u.to_le_bytes());
}

/// Appends a little-endian u16 to the provided buffer.
fn write_u16(output: &mut Vec<u8>, u: u16) {
    output.extend_from_slice(&u.to_le_bytes());
}

/// Packs a date and time into MS-DOS `(time, date)` fields.
///
/// MS-DOS counts years from 1980 in seven bits,
/// so anything outside 1980-2107 is pinned to the nearest end.
pub fn to_msdos(datetime: &NaiveDateTime) -> (u16, u16) {
    let year = datetime.year();
    if year < 1980 {
        // 1980-01-01 00:00:00
        return (0, (1 << 5) | 1);
    }
    if year > 2107 {
        // 2107-12-31 23:59:58
        return ((23 << 11) | (59 << 5) | 29, (127 << 9) | (12 << 5) | 31);
    }

    let seconds = datetime.second() as u16 / 2; // MSDOS uses 2-second precision
    let minutes = datetime.minute() as u16;
    let hours = datetime.hour() as u16;
    let time = (hours << 11) | (minutes << 5) | seconds;

    let days = datetime.day() as u16;
    let months = datetime.month() as u16;
    let years = (year - 1980) as u16;
    let date = (years << 9) | (months << 5) | days;

    (time, date)
}

/// A local file header, which precedes each file's contents.
///
/// We write these before we've read the file,
/// so the CRC and sizes are zeroed and bit 3 of the flags is set.
/// The real values follow the file contents in a [`DataDescriptor`].
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub path: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub const FIXED_SIZE: usize = 30;

    pub fn new(path: &'a str, method: CompressionMethod, last_modified: &NaiveDateTime) -> Self {
        let (last_modified_time, last_modified_date) = to_msdos(last_modified);
        Self {
            flags: FLAG_DATA_DESCRIPTOR,
            compression_method: method.as_u16(),
            last_modified_time,
            last_modified_date,
            path: path.as_bytes(),
        }
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let path_length = u16_length("file name length", self.path.len())?;

        let mut header = Vec::with_capacity(Self::FIXED_SIZE + self.path.len());
        header.extend_from_slice(&LOCAL_FILE_HEADER_MAGIC);
        write_u16(&mut header, VERSION);
        write_u16(&mut header, self.flags);
        write_u16(&mut header, self.compression_method);
        write_u16(&mut header, self.last_modified_time);
        write_u16(&mut header, self.last_modified_date);
        // CRC and sizes live in the data descriptor.
        write_u32(&mut header, 0);
        write_u32(&mut header, 0);
        write_u32(&mut header, 0);
        write_u16(&mut header, path_length);
        write_u16(&mut header, 0);
        header.extend_from_slice(self.path);
        Ok(header)
    }
}

/// The data descriptor, which follows a file's contents
/// when its local header couldn't know its CRC or size.
#[derive(Debug)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    pub const SIZE: usize = 16;

    pub fn new(crc32: u32, compressed_size: u64, uncompressed_size: u64) -> ZipResult<Self> {
        Ok(Self {
            crc32,
            compressed_size: u32_field("compressed size", compressed_size)?,
            uncompressed_size: u32_field("uncompressed size", uncompressed_size)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // 4.3.9  Data descriptor:
        //
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        //
        // 4.3.9.3 Although not originally assigned a signature, the value
        // 0x08074b50 has commonly been adopted as a signature value
        // for the data descriptor record.
        let mut descriptor = Vec::with_capacity(Self::SIZE);
        descriptor.extend_from_slice(&DATA_DESCRIPTOR_MAGIC);
        write_u32(&mut descriptor, self.crc32);
        write_u32(&mut descriptor, self.compressed_size);
        write_u32(&mut descriptor, self.uncompressed_size);
        descriptor
    }
}

/// Data for a central directory entry
///
/// Each of these records contains information about a file
/// stored in the ZIP archive, and where to find its local header.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub header_offset: u32,
    pub path: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub const FIXED_SIZE: usize = 46;

    /// Builds the entry for a file we've finished compressing.
    pub fn from_record(record: &'a FileRecord) -> ZipResult<Self> {
        let (last_modified_time, last_modified_date) = to_msdos(&record.last_modified);
        Ok(Self {
            flags: record.flags,
            compression_method: record.compression_method.as_u16(),
            last_modified_time,
            last_modified_date,
            crc32: record.crc32,
            compressed_size: u32_field("compressed size", record.compressed_size)?,
            uncompressed_size: u32_field("uncompressed size", record.size)?,
            header_offset: u32_field("local header offset", record.header_offset)?,
            path: record.name.as_bytes(),
        })
    }

    pub fn to_bytes(&self) -> ZipResult<Vec<u8>> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let path_length = u16_length("file name length", self.path.len())?;

        let mut entry = Vec::with_capacity(Self::FIXED_SIZE + self.path.len());
        entry.extend_from_slice(&CENTRAL_DIRECTORY_MAGIC);
        write_u16(&mut entry, VERSION);
        write_u16(&mut entry, VERSION);
        write_u16(&mut entry, self.flags);
        write_u16(&mut entry, self.compression_method);
        write_u16(&mut entry, self.last_modified_time);
        write_u16(&mut entry, self.last_modified_date);
        write_u32(&mut entry, self.crc32);
        write_u32(&mut entry, self.compressed_size);
        write_u32(&mut entry, self.uncompressed_size);
        write_u16(&mut entry, path_length);
        write_u16(&mut entry, 0); // extra field
        write_u16(&mut entry, 0); // comment
        write_u16(&mut entry, 0); // disk number
        write_u16(&mut entry, 0); // internal attributes
        write_u32(&mut entry, 0); // external attributes
        write_u32(&mut entry, self.header_offset);
        entry.extend_from_slice(self.path);
        Ok(entry)
    }
}

/// Data for the End of central directory record
///
/// Written at the very back of the archive, so readers can find
/// the central directory. We never span floppies,
/// so all the disk numbers are zero.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn new(
        entries: usize,
        central_directory_size: u64,
        central_directory_offset: u64,
    ) -> ZipResult<Self> {
        Ok(Self {
            entries: u16_field("entry count", entries as u64)?,
            central_directory_size: u32_field("central directory size", central_directory_size)?,
            central_directory_offset: u32_field(
                "central directory offset",
                central_directory_offset,
            )?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut eocdr = Vec::with_capacity(Self::SIZE);
        eocdr.extend_from_slice(&EOCDR_MAGIC);
        write_u16(&mut eocdr, 0);
        write_u16(&mut eocdr, 0);
        write_u16(&mut eocdr, self.entries);
        write_u16(&mut eocdr, self.entries);
        write_u32(&mut eocdr, self.central_directory_size);
        write_u32(&mut eocdr, self.central_directory_offset);
        write_u16(&mut eocdr, 0);
        eocdr
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn le16(b: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([b[at], b[at + 1]])
    }

    fn le32(b: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    #[test]
    fn msdos_packing() {
        let (time, date) = to_msdos(&at(2020, 6, 15, 13, 45, 31));
        assert_eq!(time >> 11, 13);
        assert_eq!((time >> 5) & 0x3f, 45);
        // Odd seconds round down
        assert_eq!(time & 0x1f, 15);
        assert_eq!(date >> 9, 40);
        assert_eq!((date >> 5) & 0xf, 6);
        assert_eq!(date & 0x1f, 15);
    }

    #[test]
    fn msdos_clamps_before_1980() {
        let epoch = to_msdos(&at(1980, 1, 1, 0, 0, 0));
        assert_eq!(epoch, (0, 0x21));
        assert_eq!(to_msdos(&at(1969, 12, 31, 23, 59, 59)), epoch);
        assert_eq!(to_msdos(&at(1, 1, 1, 0, 0, 0)), epoch);
        // Same value as a packed 32-bit date-time
        let (time, date) = epoch;
        assert_eq!((date as u32) << 16 | time as u32, (1 << 21) | (1 << 16));
    }

    #[test]
    fn msdos_clamps_after_2107() {
        assert_eq!(
            to_msdos(&at(2200, 3, 3, 3, 3, 3)),
            to_msdos(&at(2107, 12, 31, 23, 59, 59))
        );
    }

    #[test]
    fn local_header_layout() {
        let when = at(2001, 2, 3, 4, 5, 6);
        let header = LocalFileHeader::new("dir/file.txt", CompressionMethod::Deflate, &when)
            .to_bytes()
            .unwrap();
        assert_eq!(header.len(), LocalFileHeader::FIXED_SIZE + 12);
        assert_eq!(header[..4], LOCAL_FILE_HEADER_MAGIC);
        assert_eq!(le16(&header, 4), 20);
        assert_eq!(le16(&header, 6), 8);
        assert_eq!(le16(&header, 8), 8);
        let (time, date) = to_msdos(&when);
        assert_eq!(le16(&header, 10), time);
        assert_eq!(le16(&header, 12), date);
        assert_eq!(le32(&header, 14), 0);
        assert_eq!(le32(&header, 18), 0);
        assert_eq!(le32(&header, 22), 0);
        assert_eq!(le16(&header, 26), 12);
        assert_eq!(le16(&header, 28), 0);
        assert_eq!(&header[30..], b"dir/file.txt");

        let stored = LocalFileHeader::new("a", CompressionMethod::Stored, &when)
            .to_bytes()
            .unwrap();
        assert_eq!(le16(&stored, 8), 0);
    }

    #[test]
    fn oversized_name() {
        let name = "n".repeat(65536);
        let when = at(2001, 2, 3, 4, 5, 6);
        match LocalFileHeader::new(&name, CompressionMethod::Deflate, &when).to_bytes() {
            Err(ZipError::Unrepresentable { field, value }) => {
                assert_eq!(field, "file name length");
                assert_eq!(value, 65536);
            }
            other => panic!("Expected an unrepresentable name, got {:?}", other),
        }
    }

    #[test]
    fn descriptor_layout() {
        let descriptor = DataDescriptor::new(0xdead_beef, 7, 1234).unwrap().to_bytes();
        assert_eq!(descriptor.len(), DataDescriptor::SIZE);
        assert_eq!(descriptor[..4], DATA_DESCRIPTOR_MAGIC);
        assert_eq!(le32(&descriptor, 4), 0xdead_beef);
        assert_eq!(le32(&descriptor, 8), 7);
        assert_eq!(le32(&descriptor, 12), 1234);

        assert!(DataDescriptor::new(0, 1 << 32, 0).is_err());
        assert!(DataDescriptor::new(0, 0, 1 << 32).is_err());
    }

    #[test]
    fn central_directory_entry_layout() {
        let record = FileRecord {
            name: String::from("hello/hi.txt"),
            compression_method: CompressionMethod::Stored,
            flags: FLAG_DATA_DESCRIPTOR,
            last_modified: at(2010, 10, 10, 10, 10, 10),
            crc32: 0x1234_5678,
            compressed_size: 3,
            size: 3,
            header_offset: 999,
        };
        let entry = CentralDirectoryEntry::from_record(&record)
            .unwrap()
            .to_bytes()
            .unwrap();
        assert_eq!(entry.len(), CentralDirectoryEntry::FIXED_SIZE + 12);
        assert_eq!(entry[..4], CENTRAL_DIRECTORY_MAGIC);
        assert_eq!(le16(&entry, 4), 20);
        assert_eq!(le16(&entry, 6), 20);
        assert_eq!(le16(&entry, 8), FLAG_DATA_DESCRIPTOR);
        assert_eq!(le16(&entry, 10), 0);
        assert_eq!(le32(&entry, 16), 0x1234_5678);
        assert_eq!(le32(&entry, 20), 3);
        assert_eq!(le32(&entry, 24), 3);
        assert_eq!(le16(&entry, 28), 12);
        assert_eq!(&entry[30..42], &[0; 12]);
        assert_eq!(le32(&entry, 42), 999);
        assert_eq!(&entry[46..], b"hello/hi.txt");
    }

    #[test]
    fn central_directory_entry_offset_too_far() {
        let record = FileRecord {
            name: String::from("far"),
            compression_method: CompressionMethod::Deflate,
            flags: FLAG_DATA_DESCRIPTOR,
            last_modified: at(2010, 10, 10, 10, 10, 10),
            crc32: 0,
            compressed_size: 2,
            size: 0,
            header_offset: 1 << 32,
        };
        assert!(matches!(
            CentralDirectoryEntry::from_record(&record),
            Err(ZipError::Unrepresentable {
                field: "local header offset",
                ..
            })
        ));
    }

    #[test]
    fn eocdr_layout() {
        let eocdr = EndOfCentralDirectory::new(3, 150, 4000)
            .unwrap()
            .to_bytes();
        assert_eq!(eocdr.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(eocdr[..4], EOCDR_MAGIC);
        assert_eq!(le16(&eocdr, 4), 0);
        assert_eq!(le16(&eocdr, 6), 0);
        assert_eq!(le16(&eocdr, 8), 3);
        assert_eq!(le16(&eocdr, 10), 3);
        assert_eq!(le32(&eocdr, 12), 150);
        assert_eq!(le32(&eocdr, 16), 4000);
        assert_eq!(le16(&eocdr, 20), 0);

        assert!(EndOfCentralDirectory::new(65535, 0, 0).is_err());
    }
}
