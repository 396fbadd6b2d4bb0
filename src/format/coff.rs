use crate::format::{FormatError, SymName};

pub const HDR_LEN: usize = 20;
pub const SECT_HDR_LEN: usize = 40;
pub const RELOC_ITEM_LEN: usize = 16;
pub const SYMB_ENTRY_LEN: usize = 18;
pub const AUX_FILE_NAME_LEN: usize = 18;

/// Z8002 target magic.
pub const MAGIC: u16 = 0x8000;
/// Header flag word for a non-segmented Z8002 object.
pub const FLAGS_NONSEG: u16 = 0x2205;

pub const SECT_FLAG_TEXT: u32 = 0x0020;
pub const SECT_FLAG_DATA: u32 = 0x0040;
pub const SECT_FLAG_BSS: u32 = 0x0080;

/// Direct 16-bit address relocation.
pub const RELOC_DIRECT16: u16 = 0x0001;
/// 32-bit segmented address relocation.
pub const RELOC_SEGMENTED32: u16 = 0x0011;
/// Fixed tag word the downstream linker expects on every relocation row.
pub const RELOC_MARKER: u16 = 0x5343;

pub const CLASS_LOCAL: u8 = 0x01;
pub const CLASS_GLOBAL: u8 = 0x02;
pub const CLASS_STATIC: u8 = 0x03;
pub const CLASS_EXTERNAL: u8 = 0x05;
pub const CLASS_LABEL: u8 = 0x06;
pub const CLASS_FILE: u8 = 0x67;

/// Section number of a symbol the linker still has to resolve.
pub const SECT_NO_EXTERNAL: i16 = 0;
/// Section number of an absolute (constant) symbol.
pub const SECT_NO_ABSOLUTE: i16 = -1;
/// Section number of debug scaffolding records.
pub const SECT_NO_DEBUG: i16 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u16,
    pub num_sects: u16,
    pub date: u32,
    pub symtab_fpos: i32,
    pub num_symbs: u32,
    pub opt_hdr_len: u16,
    pub flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: SymName,
    pub paddr: u32,
    pub vaddr: u32,
    pub length: u32,
    pub fpos: i32,
    pub reloc_fpos: i32,
    pub linenum_fpos: i32,
    pub num_relocs: u16,
    pub num_lines: u16,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocItem {
    pub vaddr: u32,
    pub symbol: u32,
    /// Pre-relocation operand recovered from the code image.
    pub offset: u32,
    pub kind: u16,
    pub marker: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: SymName,
    pub value: u32,
    pub sect_no: i16,
    pub sym_type: u16,
    pub class: u8,
    pub num_aux: u8,
}

/// One row of the symbol table. Auxiliary rows share the primary record's
/// 18-byte framing on the wire but carry their own layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRecord {
    Primary(SymbolEntry),
    AuxSection {
        length: u32,
        num_relocs: u16,
        num_lines: u16,
    },
    AuxFile {
        name: [u8; AUX_FILE_NAME_LEN],
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffObject {
    pub header: Header,
    pub sections: Vec<SectionHeader>,
    pub code: Vec<u8>,
    pub relocs: Vec<RelocItem>,
    pub symbols: Vec<SymbolRecord>,
}

impl CoffObject {
    /// Serializes the object in file order: header, section table, code
    /// image, relocation table, symbol table.
    ///
    /// # Errors
    /// Refuses to serialize a symbol table whose auxiliary rows do not sit
    /// directly behind the primary records that declare them.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        check_aux_adjacency(&self.symbols)?;

        let mut out = Vec::with_capacity(
            HDR_LEN
                + self.sections.len() * SECT_HDR_LEN
                + self.code.len()
                + self.relocs.len() * RELOC_ITEM_LEN
                + self.symbols.len() * SYMB_ENTRY_LEN,
        );
        encode_header(&mut out, &self.header);
        for section in &self.sections {
            encode_section(&mut out, section);
        }
        out.extend_from_slice(&self.code);
        for reloc in &self.relocs {
            encode_reloc(&mut out, reloc);
        }
        for record in &self.symbols {
            encode_symbol(&mut out, record);
        }
        Ok(out)
    }
}

/// Verifies that every primary record with `num_aux = k` is followed by
/// exactly k auxiliary rows before the next primary record.
pub fn check_aux_adjacency(records: &[SymbolRecord]) -> Result<(), FormatError> {
    let mut idx = 0;
    while idx < records.len() {
        let SymbolRecord::Primary(entry) = &records[idx] else {
            return Err(FormatError::AuxAdjacency {
                row: idx,
                declared: 0,
                found: 1,
            });
        };
        let mut found = 0u8;
        while found < entry.num_aux {
            match records.get(idx + 1 + usize::from(found)) {
                Some(SymbolRecord::AuxSection { .. } | SymbolRecord::AuxFile { .. }) => found += 1,
                _ => {
                    return Err(FormatError::AuxAdjacency {
                        row: idx,
                        declared: entry.num_aux,
                        found,
                    })
                }
            }
        }
        idx += 1 + usize::from(entry.num_aux);
    }
    Ok(())
}

fn encode_header(out: &mut Vec<u8>, header: &Header) {
    out.extend_from_slice(&header.magic.to_be_bytes());
    out.extend_from_slice(&header.num_sects.to_be_bytes());
    out.extend_from_slice(&header.date.to_be_bytes());
    out.extend_from_slice(&header.symtab_fpos.to_be_bytes());
    out.extend_from_slice(&header.num_symbs.to_be_bytes());
    out.extend_from_slice(&header.opt_hdr_len.to_be_bytes());
    out.extend_from_slice(&header.flags.to_be_bytes());
}

fn encode_section(out: &mut Vec<u8>, section: &SectionHeader) {
    out.extend_from_slice(section.name.as_bytes());
    out.extend_from_slice(&section.paddr.to_be_bytes());
    out.extend_from_slice(&section.vaddr.to_be_bytes());
    out.extend_from_slice(&section.length.to_be_bytes());
    out.extend_from_slice(&section.fpos.to_be_bytes());
    out.extend_from_slice(&section.reloc_fpos.to_be_bytes());
    out.extend_from_slice(&section.linenum_fpos.to_be_bytes());
    out.extend_from_slice(&section.num_relocs.to_be_bytes());
    out.extend_from_slice(&section.num_lines.to_be_bytes());
    out.extend_from_slice(&section.flags.to_be_bytes());
}

fn encode_reloc(out: &mut Vec<u8>, reloc: &RelocItem) {
    out.extend_from_slice(&reloc.vaddr.to_be_bytes());
    out.extend_from_slice(&reloc.symbol.to_be_bytes());
    out.extend_from_slice(&reloc.offset.to_be_bytes());
    out.extend_from_slice(&reloc.kind.to_be_bytes());
    out.extend_from_slice(&reloc.marker.to_be_bytes());
}

fn encode_symbol(out: &mut Vec<u8>, record: &SymbolRecord) {
    match record {
        SymbolRecord::Primary(entry) => {
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&entry.value.to_be_bytes());
            out.extend_from_slice(&entry.sect_no.to_be_bytes());
            out.extend_from_slice(&entry.sym_type.to_be_bytes());
            out.push(entry.class);
            out.push(entry.num_aux);
        }
        SymbolRecord::AuxSection {
            length,
            num_relocs,
            num_lines,
        } => {
            out.extend_from_slice(&length.to_be_bytes());
            out.extend_from_slice(&num_relocs.to_be_bytes());
            out.extend_from_slice(&num_lines.to_be_bytes());
            out.extend_from_slice(&[0u8; 10]);
        }
        SymbolRecord::AuxFile { name } => {
            out.extend_from_slice(name);
        }
    }
}

#[must_use]
pub fn aux_file_name(bytes: &[u8]) -> [u8; AUX_FILE_NAME_LEN] {
    let mut name = [0u8; AUX_FILE_NAME_LEN];
    let n = bytes.len().min(AUX_FILE_NAME_LEN);
    name[..n].copy_from_slice(&bytes[..n]);
    name
}
