use anyhow::{anyhow, bail, Result};

use crate::format::coff;
use crate::format::xout::{RelocKind, XoutObject};
use crate::layout::segment_bases;
use crate::symtab::SymbolTable;

/// Translates the source relocation table into per-section output groups.
///
/// The source table is sorted by location first, then each segment's rows
/// are emitted in segment order, so group `i` holds section `i+1`'s
/// relocations in ascending address order. Every row gets its symbol
/// reference resolved against the classified table and its pre-relocation
/// operand read back from the code image.
///
/// # Errors
/// Fails on relocations naming segments or symbols outside their tables,
/// on names the classified table does not carry, on short-segmented kinds
/// (the target format has no equivalent), and on locations outside the
/// code image.
pub fn translate_relocs(
    object: &XoutObject,
    symbols: &SymbolTable,
) -> Result<Vec<Vec<coff::RelocItem>>> {
    if let Some(reloc) = object
        .relocs
        .iter()
        .find(|reloc| usize::from(reloc.segment) >= object.segments.len())
    {
        bail!(
            "relocation at {:#06x} names segment {} outside the segment table",
            reloc.location,
            reloc.segment
        );
    }

    let bases = segment_bases(&object.segments);
    let mut sorted: Vec<_> = object.relocs.iter().collect();
    sorted.sort_by_key(|reloc| reloc.location);

    let mut groups = vec![Vec::new(); object.segments.len()];
    for (seg, group) in groups.iter_mut().enumerate() {
        for reloc in sorted.iter().filter(|r| usize::from(r.segment) == seg) {
            let kind = match reloc.kind {
                RelocKind::Off | RelocKind::ExtOff => coff::RELOC_DIRECT16,
                RelocKind::LongSeg | RelocKind::ExtLongSeg => coff::RELOC_SEGMENTED32,
                RelocKind::ShortSeg | RelocKind::ExtShortSeg => bail!(
                    "short-segmented relocation at {:#06x} has no coff equivalent",
                    reloc.location
                ),
            };

            let symbol = if reloc.kind.is_external() {
                let entry = object.symbols.get(usize::from(reloc.symbol)).ok_or_else(|| {
                    anyhow!(
                        "relocation at {:#06x} references symbol {} outside the symbol table",
                        reloc.location,
                        reloc.symbol
                    )
                })?;
                symbols.index_of(&entry.name).ok_or_else(|| {
                    anyhow!("unresolved relocation target {}", entry.name)
                })?
            } else {
                symbols.segment_top(usize::from(reloc.symbol)).ok_or_else(|| {
                    anyhow!(
                        "relocation at {:#06x} references segment {} with no top symbol",
                        reloc.location,
                        reloc.symbol
                    )
                })?
            };

            // recover the operand the assembler left at the patch site so
            // the linker can verify or recompute it
            let pos = (bases[seg] + u32::from(reloc.location)) as usize;
            let operand = object.code.get(pos..pos + 2).ok_or_else(|| {
                anyhow!(
                    "relocation at {:#06x} lies outside the code image",
                    reloc.location
                )
            })?;
            let offset = u32::from(u16::from_be_bytes([operand[0], operand[1]]));

            group.push(coff::RelocItem {
                vaddr: u32::from(reloc.location),
                symbol,
                offset,
                kind,
                marker: coff::RELOC_MARKER,
            });
        }
    }
    Ok(groups)
}
