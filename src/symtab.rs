use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::format::coff::{self, aux_file_name};
use crate::format::xout::{SegKind, SymKind, SymbolEntry, XoutObject, SEG_NONE};
use crate::format::SymName;

/// Output section name for a segment kind. Unrecognized kinds get an
/// empty name, which the downstream linker tolerates.
#[must_use]
pub fn section_name(kind: SegKind) -> SymName {
    match kind {
        SegKind::Code => SymName::from_bytes(b".text"),
        SegKind::Data => SymName::from_bytes(b".data"),
        SegKind::Const => SymName::from_bytes(b".rdata"),
        SegKind::Bss => SymName::from_bytes(b".bss"),
        _ => SymName::EMPTY,
    }
}

/// Gives every segment the symbols the conversion depends on: a
/// segment-name symbol carrying the output section name, and a local
/// "segment top" symbol at offset 0 for intra-segment relocations to
/// resolve against.
///
/// An existing segment-name symbol is renamed in place; missing ones are
/// appended. Top symbols are always appended, one per segment.
pub fn ensure_segment_symbols(object: &mut XoutObject) {
    for idx in 0..object.segments.len() {
        let name = section_name(object.segments[idx].kind);
        let existing = object
            .symbols
            .iter_mut()
            .find(|symbol| symbol.kind == SymKind::SegName && usize::from(symbol.segment) == idx);
        match existing {
            Some(symbol) => symbol.name = name,
            None => object.symbols.push(SymbolEntry {
                segment: idx as u8,
                kind: SymKind::SegName,
                value: 0,
                name,
            }),
        }
    }
    for idx in 0..object.segments.len() {
        object.symbols.push(SymbolEntry {
            segment: idx as u8,
            kind: SymKind::Local,
            value: 0,
            name: SymName::seg_top(idx),
        });
    }
}

/// The classified output symbol table plus a name index for relocation
/// resolution. Row numbers count auxiliary rows, matching the numbering
/// the emitted file uses.
#[derive(Debug)]
pub struct SymbolTable {
    records: Vec<coff::SymbolRecord>,
    by_name: HashMap<SymName, u32>,
}

impl SymbolTable {
    /// Classifies the source symbols into the fixed output order:
    /// the `.file` scaffolding pair, file-local symbols, section symbols
    /// with their auxiliary rows, global definitions grouped by segment,
    /// then the remaining external and absolute symbols.
    ///
    /// # Errors
    /// Fails when a segment-name symbol points outside the segment table.
    pub fn build(object: &XoutObject) -> Result<Self> {
        let mut table = SymbolTable {
            records: Vec::with_capacity(object.symbols.len() + 2),
            by_name: HashMap::new(),
        };

        // scaffolding the target format expects even without source-file
        // metadata
        table.push_primary(coff::SymbolEntry {
            name: SymName::from_bytes(b".file"),
            value: 0,
            sect_no: coff::SECT_NO_DEBUG,
            sym_type: 0,
            class: coff::CLASS_FILE,
            num_aux: 1,
        });
        table.push_aux(coff::SymbolRecord::AuxFile {
            name: aux_file_name(b"fake"),
        });

        for symbol in &object.symbols {
            if symbol.segment == SEG_NONE || symbol.kind != SymKind::Local {
                continue;
            }
            table.push_primary(coff::SymbolEntry {
                name: symbol.name,
                value: u32::from(symbol.value),
                sect_no: i16::from(symbol.segment) + 1,
                sym_type: 0,
                class: coff::CLASS_STATIC,
                num_aux: 0,
            });
        }

        for symbol in &object.symbols {
            if symbol.kind != SymKind::SegName {
                continue;
            }
            let seg = usize::from(symbol.segment);
            let Some(segment) = object.segments.get(seg) else {
                bail!(
                    "segment-name symbol {} points at segment {seg} outside the segment table",
                    symbol.name
                );
            };
            let num_relocs = object
                .relocs
                .iter()
                .filter(|reloc| reloc.segment == symbol.segment)
                .count();
            let Ok(num_relocs) = u16::try_from(num_relocs) else {
                bail!("segment {seg} carries {num_relocs} relocations, over the format limit");
            };
            table.push_primary(coff::SymbolEntry {
                name: symbol.name,
                value: 0,
                sect_no: i16::from(symbol.segment) + 1,
                sym_type: 0,
                class: coff::CLASS_STATIC,
                num_aux: 1,
            });
            table.push_aux(coff::SymbolRecord::AuxSection {
                length: u32::from(segment.length),
                num_relocs,
                num_lines: 0,
            });
        }

        for seg in 0..object.segments.len() {
            for symbol in &object.symbols {
                if usize::from(symbol.segment) != seg || symbol.kind != SymKind::Global {
                    continue;
                }
                table.push_primary(coff::SymbolEntry {
                    name: symbol.name,
                    value: u32::from(symbol.value),
                    sect_no: i16::from(symbol.segment) + 1,
                    sym_type: 0,
                    class: coff::CLASS_GLOBAL,
                    num_aux: 0,
                });
            }
        }

        for symbol in &object.symbols {
            if symbol.segment != SEG_NONE {
                continue;
            }
            match symbol.kind {
                SymKind::UndefExt => table.push_primary(coff::SymbolEntry {
                    name: symbol.name,
                    value: 0,
                    sect_no: coff::SECT_NO_EXTERNAL,
                    sym_type: 0,
                    class: coff::CLASS_GLOBAL,
                    num_aux: 0,
                }),
                // a local under the external sentinel is an assembler
                // constant, emitted as an absolute symbol
                SymKind::Local => table.push_primary(coff::SymbolEntry {
                    name: symbol.name,
                    value: u32::from(symbol.value),
                    sect_no: coff::SECT_NO_ABSOLUTE,
                    sym_type: 0,
                    class: coff::CLASS_GLOBAL,
                    num_aux: 0,
                }),
                _ => {}
            }
        }

        Ok(table)
    }

    fn push_primary(&mut self, entry: coff::SymbolEntry) {
        let row = self.records.len() as u32;
        // the first definition of a name wins lookups
        self.by_name.entry(entry.name).or_insert(row);
        self.records.push(coff::SymbolRecord::Primary(entry));
    }

    fn push_aux(&mut self, record: coff::SymbolRecord) {
        self.records.push(record);
    }

    /// Row of the first record carrying `name`.
    #[must_use]
    pub fn index_of(&self, name: &SymName) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Row of the synthesized top symbol of `segment`.
    #[must_use]
    pub fn segment_top(&self, segment: usize) -> Option<u32> {
        self.index_of(&SymName::seg_top(segment))
    }

    /// Total rows, auxiliary records included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn records(&self) -> &[coff::SymbolRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<coff::SymbolRecord> {
        self.records
    }
}
