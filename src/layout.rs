use crate::format::coff::{HDR_LEN, RELOC_ITEM_LEN, SECT_HDR_LEN};
use crate::format::xout::{SegKind, Segment};

/// Base address of every segment in the concatenated code image: the sum
/// of the lengths of all segments preceding it in table order.
#[must_use]
pub fn segment_bases(segments: &[Segment]) -> Vec<u32> {
    let mut bases = Vec::with_capacity(segments.len());
    let mut pos = 0u32;
    for segment in segments {
        bases.push(pos);
        pos += u32::from(segment.length);
    }
    bases
}

/// File offset of each section's data in the output. The code image
/// follows the header and section table; initialized sections keep their
/// segment order, BSS sections own no file bytes and get offset 0.
#[must_use]
pub fn section_data_offsets(segments: &[Segment]) -> Vec<i32> {
    let code_start = (HDR_LEN + segments.len() * SECT_HDR_LEN) as i32;
    let mut offsets = Vec::with_capacity(segments.len());
    let mut offset = 0i32;
    for segment in segments {
        if segment.kind == SegKind::Bss {
            offsets.push(0);
        } else {
            offsets.push(code_start + offset);
            offset += i32::from(segment.length);
        }
    }
    offsets
}

/// File offset of each section's relocation group. Groups follow the code
/// image back to back in section order; a section with no relocations
/// reports offset 0.
#[must_use]
pub fn reloc_table_offsets(num_sects: usize, code_len: usize, counts: &[u16]) -> Vec<i32> {
    let mut fpos = (HDR_LEN + num_sects * SECT_HDR_LEN + code_len) as i32;
    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                return 0;
            }
            let here = fpos;
            fpos += i32::from(count) * RELOC_ITEM_LEN as i32;
            here
        })
        .collect()
}

/// File offset of the symbol table, past the header, section table, code
/// image, and every relocation group.
#[must_use]
pub fn symtab_offset(num_sects: usize, code_len: usize, num_relocs: usize) -> i32 {
    (HDR_LEN + num_sects * SECT_HDR_LEN + code_len + num_relocs * RELOC_ITEM_LEN) as i32
}

#[cfg(test)]
mod tests {
    use super::{reloc_table_offsets, section_data_offsets, segment_bases, symtab_offset};
    use crate::format::xout::{SegKind, Segment};

    fn seg(kind: SegKind, length: u16) -> Segment {
        Segment {
            number: 0,
            kind,
            length,
        }
    }

    #[test]
    fn bases_accumulate_preceding_lengths() {
        let segments = [
            seg(SegKind::Code, 0x10),
            seg(SegKind::Data, 0x08),
            seg(SegKind::Bss, 0x20),
        ];
        assert_eq!(segment_bases(&segments), vec![0x00, 0x10, 0x18]);
    }

    #[test]
    fn bss_owns_no_file_bytes() {
        let segments = [
            seg(SegKind::Code, 4),
            seg(SegKind::Bss, 16),
            seg(SegKind::Data, 2),
        ];
        // header 20 + 3 sections * 40 = 140; data follows code directly
        assert_eq!(section_data_offsets(&segments), vec![140, 0, 144]);
    }

    #[test]
    fn reloc_groups_pack_back_to_back() {
        // 2 sections, 6 code bytes: groups start at 20 + 80 + 6 = 106
        assert_eq!(reloc_table_offsets(2, 6, &[2, 1]), vec![106, 138]);
    }

    #[test]
    fn empty_reloc_groups_report_offset_zero() {
        assert_eq!(reloc_table_offsets(3, 0, &[0, 2, 1]), vec![0, 140, 172]);
    }

    #[test]
    fn symbol_table_sits_past_all_relocations() {
        assert_eq!(symtab_offset(2, 6, 3), 20 + 80 + 6 + 48);
    }
}
