//! Per-chunk checksum validation of GCF files

use super::archive::Archive;
use super::header::{CHECKSUM_CHUNK_SIZE, NO_CHECKSUM};
use super::stream::GcfStream;
use crate::mapping::SharedMapping;
use crate::package::Validation;
use crate::stream::Stream;
use crate::{FileMode, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Checksum of one chunk: `adler32` (seeded with 0) XOR `crc32`.
pub fn chunk_checksum(data: &[u8]) -> u32 {
    let mut adler = adler::Adler32::from_checksum(0);
    adler.write_slice(data);
    adler.checksum() ^ crc32fast::hash(data)
}

/// Validate directory entry `item` against its checksum run.
pub(crate) fn validate(
    mapping: &SharedMapping,
    archive: &Rc<RefCell<Archive>>,
    item: u32,
    name: String,
) -> Result<Validation> {
    let (size, checksums) = {
        let archive = archive.borrow();
        let entry = *archive.entry(item)?;
        let size = u64::from(entry.item_size);

        if archive.allocated_size(item) < size {
            return Ok(Validation::Incomplete);
        }
        if entry.is_encrypted() || entry.checksum_index == NO_CHECKSUM {
            return Ok(Validation::AssumedOk);
        }
        let Some(map) = archive.checksum_map.get(entry.checksum_index as usize) else {
            debug!("{}: checksum index {} out of range", name, entry.checksum_index);
            return Ok(Validation::Error);
        };
        let first = map.first_checksum_index as usize;
        let Some(run) = archive
            .checksums
            .get(first..first.saturating_add(map.checksum_count as usize))
        else {
            debug!("{}: checksum run past the checksum table", name);
            return Ok(Validation::Error);
        };
        (size, run.to_vec())
    };

    let mut stream = GcfStream::new(name, Rc::clone(mapping), Rc::clone(archive), item, size);
    stream.open(FileMode::READ)?;

    let mut buffer = vec![0u8; CHECKSUM_CHUNK_SIZE];
    let mut remaining = size;
    let mut chunk = 0usize;
    while remaining > 0 {
        let length = remaining.min(CHECKSUM_CHUNK_SIZE as u64) as usize;
        stream.read_exact(&mut buffer[..length])?;

        let Some(&expected) = checksums.get(chunk) else {
            return Ok(Validation::Error);
        };
        if chunk_checksum(&buffer[..length]) != expected {
            debug!("{}: chunk {} checksum mismatch", stream.name(), chunk);
            return Ok(Validation::Corrupt);
        }

        remaining -= length as u64;
        chunk += 1;
    }
    Ok(Validation::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_checksum_known_values() {
        // adler32 seeded with 0 of the empty input is 0, as is crc32.
        assert_eq!(chunk_checksum(&[]), 0);
        // "a": adler (a=0x61, b=0x61) = 0x00610061, crc32 = 0xE8B7BE43.
        assert_eq!(chunk_checksum(b"a"), 0x0061_0061 ^ 0xE8B7_BE43);
    }
}
