//! Property tests for the staging buffer
//!
//! The core claim: however the wire slices a byte string into chunks,
//! the flash image comes out identical to one contiguous write.

use proptest::prelude::*;

use sectorsense_boot::Staging;
use sectorsense_core::flash::{program_bytes, Flash, MemFlash, FLASH_BASE};

type TestFlash = MemFlash<0x1000>;

proptest! {
    #[test]
    fn any_chunking_matches_a_contiguous_write(
        data in proptest::collection::vec(any::<u8>(), 0..512),
        chunk_sizes in proptest::collection::vec(1usize..=7, 0..200),
    ) {
        // Reference: one contiguous padded write.
        let mut reference = TestFlash::new();
        program_bytes(&mut reference, FLASH_BASE, &data).unwrap();

        // Staged: feed the same bytes in arbitrary wire-sized chunks.
        let mut staged = TestFlash::new();
        let mut staging = Staging::new(FLASH_BASE);
        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < data.len() {
            let take = (*sizes.next().unwrap_or(&7)).min(data.len() - offset);
            staging.push_bytes(&mut staged, &data[offset..offset + take]).unwrap();
            prop_assert!(staging.pending_len() < 8);
            offset += take;
        }
        staging.flush_tail(&mut staged).unwrap();

        // Compare the whole written region, padding included.
        let padded_len = data.len().div_ceil(8) * 8;
        let mut expect = vec![0u8; padded_len];
        let mut actual = vec![0u8; padded_len];
        reference.read(FLASH_BASE, &mut expect).unwrap();
        staged.read(FLASH_BASE, &mut actual).unwrap();
        prop_assert_eq!(expect, actual);
    }
}
