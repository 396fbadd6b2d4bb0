use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::bss::unify_bss;
use crate::cli::Args;
use crate::format::coff::{self, CoffObject};
use crate::format::xout::{parse_object, SegKind, XoutObject};
use crate::layout;
use crate::reloc::translate_relocs;
use crate::symtab::{ensure_segment_symbols, section_name, SymbolTable};

pub fn run(args: Args) -> Result<()> {
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input))?;
    let object = parse_object(&bytes)?;
    if args.verbose {
        println!(
            "parsed {}: {} segment(s), {} code byte(s), {} relocation(s), {} symbol(s)",
            args.input,
            object.segments.len(),
            object.code.len(),
            object.relocs.len(),
            object.symbols.len()
        );
    }

    let coff = convert(object)?;
    if args.verbose {
        println!(
            "converted: {} section(s), {} relocation(s), {} symbol row(s)",
            coff.sections.len(),
            coff.relocs.len(),
            coff.symbols.len()
        );
    }

    let output = match &args.output {
        Some(path) => path.clone(),
        None => derive_output_path(&args.input),
    };
    let payload = coff.encode()?;
    std::fs::write(&output, payload).with_context(|| format!("failed to write {output}"))?;
    if args.verbose {
        println!("wrote {output}");
    }
    Ok(())
}

/// Runs the conversion pipeline over one parsed object. The stages are
/// strictly ordered: common symbols move into BSS and segment symbols are
/// synthesized before any table is classified, the symbol table exists
/// before relocations resolve against it, and the header is computed last
/// from the final table sizes.
pub fn convert(mut object: XoutObject) -> Result<CoffObject> {
    unify_bss(&mut object)?;
    ensure_segment_symbols(&mut object);

    let mut sections = build_sections(&object);
    let symbols = SymbolTable::build(&object)?;
    let reloc_groups = translate_relocs(&object, &symbols)?;

    let mut counts = Vec::with_capacity(reloc_groups.len());
    for group in &reloc_groups {
        match u16::try_from(group.len()) {
            Ok(count) => counts.push(count),
            Err(_) => bail!("section relocation count {} exceeds the format", group.len()),
        }
    }
    let reloc_fpos = layout::reloc_table_offsets(sections.len(), object.code.len(), &counts);
    for ((section, count), fpos) in sections.iter_mut().zip(&counts).zip(&reloc_fpos) {
        section.num_relocs = *count;
        section.reloc_fpos = *fpos;
    }

    let relocs: Vec<coff::RelocItem> = reloc_groups.into_iter().flatten().collect();
    let header = coff::Header {
        magic: coff::MAGIC,
        num_sects: sections.len() as u16,
        date: 0,
        symtab_fpos: layout::symtab_offset(sections.len(), object.code.len(), relocs.len()),
        num_symbs: symbols.len() as u32,
        opt_hdr_len: 0,
        flags: coff::FLAGS_NONSEG,
    };

    Ok(CoffObject {
        header,
        sections,
        code: object.code,
        relocs,
        symbols: symbols.into_records(),
    })
}

/// Section `i+1` mirrors segment `i`: same order, same length, named and
/// flagged by segment kind. Relocation fields are filled in once the
/// relocation groups are known.
fn build_sections(object: &XoutObject) -> Vec<coff::SectionHeader> {
    let data_offsets = layout::section_data_offsets(&object.segments);
    object
        .segments
        .iter()
        .zip(data_offsets)
        .map(|(segment, fpos)| coff::SectionHeader {
            name: section_name(segment.kind),
            paddr: 0,
            vaddr: 0,
            length: u32::from(segment.length),
            fpos,
            reloc_fpos: 0,
            linenum_fpos: 0,
            num_relocs: 0,
            num_lines: 0,
            flags: section_flags(segment.kind),
        })
        .collect()
}

fn section_flags(kind: SegKind) -> u32 {
    match kind {
        SegKind::Bss => coff::SECT_FLAG_BSS,
        SegKind::Code => coff::SECT_FLAG_TEXT,
        SegKind::Data | SegKind::Const => coff::SECT_FLAG_DATA,
        _ => 0,
    }
}

fn derive_output_path(input: &str) -> String {
    match Path::new(input).file_stem() {
        Some(stem) => format!("{}.o", stem.to_string_lossy()),
        None => "out.o".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{convert, derive_output_path};
    use crate::format::coff;
    use crate::format::xout::{
        Header, RelocItem, RelocKind, SegKind, Segment, SymKind, SymbolEntry, XoutObject, SEG_NONE,
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

    #[test]
    fn derives_output_next_to_the_working_directory() {
        assert_eq!(derive_output_path("prog.x"), "prog.o");
        assert_eq!(derive_output_path("dir/sub/prog.x"), "prog.o");
        assert_eq!(derive_output_path("noext"), "noext.o");
    }

    #[test]
    fn sections_mirror_segments_one_based() {
        let object = object_with(
            vec![
                Segment {
                    number: 0,
                    kind: SegKind::Code,
                    length: 2,
                },
                Segment {
                    number: 1,
                    kind: SegKind::Data,
                    length: 2,
                },
            ],
            vec![0xaa, 0xbb, 0xcc, 0xdd],
            Vec::new(),
            Vec::new(),
        );
        let coff = convert(object).expect("convert should succeed");

        // the data segment plus a synthesized bss section
        assert_eq!(coff.sections.len(), 3);
        assert_eq!(coff.sections[0].name.to_string(), ".text");
        assert_eq!(coff.sections[0].flags, coff::SECT_FLAG_TEXT);
        assert_eq!(coff.sections[1].name.to_string(), ".data");
        assert_eq!(coff.sections[2].name.to_string(), ".bss");
        assert_eq!(coff.sections[2].fpos, 0);
        assert_eq!(coff.header.num_sects, 3);
        assert_eq!(coff.header.magic, coff::MAGIC);
        assert_eq!(coff.header.flags, coff::FLAGS_NONSEG);
    }

    #[test]
    fn header_offsets_follow_final_table_sizes() {
        let object = object_with(
            vec![Segment {
                number: 0,
                kind: SegKind::Code,
                length: 4,
            }],
            vec![0x00, 0x10, 0x00, 0x00],
            vec![RelocItem {
                segment: 0,
                kind: RelocKind::Off,
                location: 0,
                symbol: 0,
            }],
            Vec::new(),
        );
        let coff = convert(object).expect("convert should succeed");

        // 2 sections (code + synthesized bss), 4 code bytes, 1 relocation
        let expected_symtab = 20 + 2 * 40 + 4 + 16;
        assert_eq!(coff.header.symtab_fpos, expected_symtab);
        assert_eq!(coff.header.num_symbs as usize, coff.symbols.len());
        assert_eq!(coff.sections[0].num_relocs, 1);
        assert_eq!(coff.sections[0].reloc_fpos, 20 + 2 * 40 + 4);
        assert_eq!(coff.sections[1].num_relocs, 0);
        assert_eq!(coff.sections[1].reloc_fpos, 0);
        // the patch-site operand was read back from the code image
        assert_eq!(coff.relocs[0].offset, 0x0010);
    }

    #[test]
    fn common_symbols_land_in_bss_before_classification() {
        let object = object_with(
            vec![Segment {
                number: 0,
                kind: SegKind::Code,
                length: 2,
            }],
            vec![0x00, 0x00],
            Vec::new(),
            vec![SymbolEntry {
                segment: SEG_NONE,
                kind: SymKind::UndefExt,
                value: 10,
                name: SymName::from_bytes(b"BUF"),
            }],
        );
        let coff = convert(object).expect("convert should succeed");

        assert_eq!(coff.sections.len(), 2);
        assert_eq!(coff.sections[1].length, 10);
        let buf = coff
            .symbols
            .iter()
            .find_map(|record| match record {
                coff::SymbolRecord::Primary(entry)
                    if entry.name == SymName::from_bytes(b"BUF") =>
                {
                    Some(*entry)
                }
                _ => None,
            })
            .expect("BUF must be classified");
        assert_eq!(buf.sect_no, 2);
        assert_eq!(buf.value, 0);
        assert_eq!(buf.class, coff::CLASS_GLOBAL);
    }
}
