use anyhow::{bail, Result};

use crate::format::xout::{SegKind, Segment, SymKind, XoutObject, SEG_NONE};

/// Finds the BSS segment, appending an empty one when the object carries
/// none, then allocates every common symbol inside it.
///
/// An undefined external with a nonzero value is a common block: the value
/// is its requested size, not an address. Each one becomes a global
/// definition placed at the BSS segment's current end, in symbol-table
/// order, so repeated conversions lay BSS out identically.
///
/// Returns the BSS segment's index.
pub fn unify_bss(object: &mut XoutObject) -> Result<usize> {
    let bss = match object
        .segments
        .iter()
        .position(|segment| segment.kind == SegKind::Bss)
    {
        Some(idx) => idx,
        None => {
            if object.segments.len() >= usize::from(SEG_NONE) {
                bail!("segment table is full, cannot synthesize a bss segment");
            }
            object.segments.push(Segment {
                number: SEG_NONE,
                kind: SegKind::Bss,
                length: 0,
            });
            object.segments.len() - 1
        }
    };

    for symbol in &mut object.symbols {
        if symbol.segment != SEG_NONE || symbol.kind != SymKind::UndefExt || symbol.value == 0 {
            continue;
        }
        let size = symbol.value;
        symbol.kind = SymKind::Global;
        symbol.segment = bss as u8;
        symbol.value = object.segments[bss].length;
        object.segments[bss].length = match object.segments[bss].length.checked_add(size) {
            Some(length) => length,
            None => bail!(
                "bss segment overflows the 16-bit address space allocating {}",
                symbol.name
            ),
        };
    }
    Ok(bss)
}

#[cfg(test)]
mod tests {
    use super::unify_bss;
    use crate::format::xout::{
        Header, RelocItem, SegKind, Segment, SymKind, SymbolEntry, XoutObject, SEG_NONE,
    };
    use crate::format::SymName;

    fn object_with(
        segments: Vec<Segment>,
        code: Vec<u8>,
        relocs: Vec<RelocItem>,
        symbols: Vec<SymbolEntry>,
    ) -> XoutObject {
        XoutObject {
            header: Header {
                magic: 0xee02,
                num_segs: segments.len() as i16,
                code_len: code.len() as i32,
                relocs_len: (relocs.len() * 6) as i32,
                symbs_len: (symbols.len() * 12) as i32,
            },
            segments,
            code,
            relocs,
            symbols,
        }
    }

    fn undef_ext(name: &[u8], value: u16) -> SymbolEntry {
        SymbolEntry {
            segment: SEG_NONE,
            kind: SymKind::UndefExt,
            value,
            name: SymName::from_bytes(name),
        }
    }

    #[test]
    fn synthesizes_bss_when_absent() {
        let mut object = object_with(
            vec![Segment {
                number: 0,
                kind: SegKind::Code,
                length: 4,
            }],
            vec![0; 4],
            Vec::new(),
            vec![undef_ext(b"BUF", 10)],
        );
        let bss = unify_bss(&mut object).expect("unify should succeed");
        assert_eq!(bss, 1);
        assert_eq!(object.segments.len(), 2);
        assert_eq!(object.segments[1].kind, SegKind::Bss);
        assert_eq!(object.segments[1].number, SEG_NONE);
        assert_eq!(object.segments[1].length, 10);
        assert_eq!(object.symbols[0].kind, SymKind::Global);
        assert_eq!(object.symbols[0].segment, 1);
        assert_eq!(object.symbols[0].value, 0);
    }

    #[test]
    fn grows_existing_bss_in_table_order() {
        let mut object = object_with(
            vec![
                Segment {
                    number: 0,
                    kind: SegKind::Code,
                    length: 2,
                },
                Segment {
                    number: 1,
                    kind: SegKind::Bss,
                    length: 6,
                },
            ],
            vec![0; 2],
            Vec::new(),
            vec![undef_ext(b"A", 4), undef_ext(b"B", 2)],
        );
        let bss = unify_bss(&mut object).expect("unify should succeed");
        assert_eq!(bss, 1);
        // A lands at the old end, B right behind it
        assert_eq!(object.symbols[0].value, 6);
        assert_eq!(object.symbols[1].value, 10);
        assert_eq!(object.segments[1].length, 12);
    }

    #[test]
    fn leaves_true_externals_and_definitions_alone() {
        let mut object = object_with(
            vec![Segment {
                number: 0,
                kind: SegKind::Bss,
                length: 0,
            }],
            Vec::new(),
            Vec::new(),
            vec![
                undef_ext(b"FOO", 0),
                SymbolEntry {
                    segment: 0,
                    kind: SymKind::Global,
                    value: 3,
                    name: SymName::from_bytes(b"BAR"),
                },
            ],
        );
        unify_bss(&mut object).expect("unify should succeed");
        assert_eq!(object.symbols[0].kind, SymKind::UndefExt);
        assert_eq!(object.symbols[0].segment, SEG_NONE);
        assert_eq!(object.symbols[1].value, 3);
        assert_eq!(object.segments[0].length, 0);
    }

    #[test]
    fn rejects_overflowing_common_allocation() {
        let mut object = object_with(
            vec![Segment {
                number: 0,
                kind: SegKind::Bss,
                length: 0xfff0,
            }],
            Vec::new(),
            Vec::new(),
            vec![undef_ext(b"HUGE", 0x20)],
        );
        assert!(unify_bss(&mut object).is_err());
    }
}
