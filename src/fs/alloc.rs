//! Wear-levelled free-sector selection: always pick the free sector with the
//! smallest allocation counter, ties broken by the lowest sector index.

use super::sector::SectorHeader;

pub fn pick_free_sector<const N: usize, const NS: usize>(headers: &[SectorHeader<NS>; N]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (idx, header) in headers.iter().enumerate() {
        if !header.is_free() {
            continue;
        }
        best = match best {
            Some((_, counter)) if header.allocation_counter >= counter => best,
            _ => Some((idx, header.allocation_counter)),
        };
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_lowest_counter_tie_broken_by_index() {
        let counters = [10u32, 3, 7, 1, 5, 12, 0, 9];
        let mut headers: [SectorHeader<4>; 8] = [SectorHeader::free(0); 8];
        for (h, c) in headers.iter_mut().zip(counters.iter()) {
            *h = SectorHeader::free(*c);
        }
        assert_eq!(pick_free_sector(&headers), Some(6));

        headers[6].file_id = 0; // no longer free
        assert_eq!(pick_free_sector(&headers), Some(3));
    }

    #[test]
    fn no_free_sectors_returns_none() {
        let mut headers: [SectorHeader<4>; 3] = [SectorHeader::free(0); 3];
        for h in headers.iter_mut() {
            h.file_id = 1;
        }
        assert_eq!(pick_free_sector(&headers), None);
    }
}
