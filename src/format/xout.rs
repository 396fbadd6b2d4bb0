use crate::format::{FormatError, SymName, NAME_LEN};

pub const HDR_LEN: usize = 16;
pub const SEG_ENTRY_LEN: usize = 4;
pub const RELOC_ITEM_LEN: usize = 6;
pub const SYMB_ENTRY_LEN: usize = 12;

/// Header magic variants. Every xout flavor carries the 0xee tag byte; the
/// low byte encodes segmented/executable/shared/split-ID combinations.
pub const MAGIC_SEG: u16 = 0xee00;
pub const MAGIC_SEG_X: u16 = 0xee01;
pub const MAGIC_NONSEG: u16 = 0xee02;
pub const MAGIC_NONSEG_X: u16 = 0xee03;
pub const MAGIC_NONSEG_SHARED: u16 = 0xee06;
pub const MAGIC_NONSEG_X_SHARED: u16 = 0xee07;
pub const MAGIC_NONSEG_SPLIT: u16 = 0xee0a;
pub const MAGIC_NONSEG_X_SPLIT: u16 = 0xee0b;

const MAGIC_TAG: u8 = 0xee;

/// Segment number reserved as "unassigned"; symbol and relocation records
/// use the same value to mean external or absolute.
pub const SEG_NONE: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegKind {
    Undefined,
    Bss,
    Stack,
    Code,
    Const,
    Data,
    CdMix,
    CdMixProt,
}

impl SegKind {
    pub fn from_raw(raw: u8) -> Result<Self, FormatError> {
        match raw {
            0 => Ok(SegKind::Undefined),
            1 => Ok(SegKind::Bss),
            2 => Ok(SegKind::Stack),
            3 => Ok(SegKind::Code),
            4 => Ok(SegKind::Const),
            5 => Ok(SegKind::Data),
            6 => Ok(SegKind::CdMix),
            7 => Ok(SegKind::CdMixProt),
            _ => Err(FormatError::UnknownSegmentKind(raw)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 16-bit non-segmented offset.
    Off,
    /// 16-bit short segmented address.
    ShortSeg,
    /// 32-bit long segmented address.
    LongSeg,
    /// 16-bit offset referencing an external symbol.
    ExtOff,
    /// Short segmented address referencing an external symbol.
    ExtShortSeg,
    /// Long segmented address referencing an external symbol.
    ExtLongSeg,
}

impl RelocKind {
    pub fn from_raw(raw: u8) -> Result<Self, FormatError> {
        match raw {
            1 => Ok(RelocKind::Off),
            2 => Ok(RelocKind::ShortSeg),
            3 => Ok(RelocKind::LongSeg),
            5 => Ok(RelocKind::ExtOff),
            6 => Ok(RelocKind::ExtShortSeg),
            7 => Ok(RelocKind::ExtLongSeg),
            _ => Err(FormatError::UnknownRelocKind(raw)),
        }
    }

    /// External kinds carry a symbol-table index; plain kinds carry a
    /// segment index.
    #[must_use]
    pub fn is_external(self) -> bool {
        matches!(
            self,
            RelocKind::ExtOff | RelocKind::ExtShortSeg | RelocKind::ExtLongSeg
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymKind {
    Local,
    UndefExt,
    Global,
    SegName,
}

impl SymKind {
    pub fn from_raw(raw: u8) -> Result<Self, FormatError> {
        match raw {
            1 => Ok(SymKind::Local),
            2 => Ok(SymKind::UndefExt),
            3 => Ok(SymKind::Global),
            4 => Ok(SymKind::SegName),
            _ => Err(FormatError::UnknownSymbolKind(raw)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u16,
    pub num_segs: i16,
    pub code_len: i32,
    pub relocs_len: i32,
    pub symbs_len: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub number: u8,
    pub kind: SegKind,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocItem {
    pub segment: u8,
    pub kind: RelocKind,
    pub location: u16,
    pub symbol: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub segment: u8,
    pub kind: SymKind,
    pub value: u16,
    pub name: SymName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XoutObject {
    pub header: Header,
    pub segments: Vec<Segment>,
    pub code: Vec<u8>,
    pub relocs: Vec<RelocItem>,
    pub symbols: Vec<SymbolEntry>,
}

/// Parses one xout object image into its in-memory tables.
///
/// The segment table sits right after the header, then the concatenated
/// code image, the relocation table, and the symbol table. Record counts
/// are derived from the header's declared byte lengths. Relocation rows
/// with a zero kind byte are assembler padding and are dropped.
///
/// # Errors
/// Returns `FormatError` when the stream is truncated, the magic is not an
/// xout tag, a declared length is negative or ragged, or a record carries
/// an unknown kind code.
pub fn parse_object(input: &[u8]) -> Result<XoutObject, FormatError> {
    let mut reader = Reader::new(input);

    let magic = reader.read_u16("header")?;
    if magic.to_be_bytes()[0] != MAGIC_TAG {
        return Err(FormatError::BadMagic(magic));
    }
    let num_segs = reader.read_u16("header")? as i16;
    let code_len = reader.read_u32("header")? as i32;
    let relocs_len = reader.read_u32("header")? as i32;
    let symbs_len = reader.read_u32("header")? as i32;

    if num_segs < 0 {
        return Err(FormatError::NegativeField {
            field: "segment count",
            value: i32::from(num_segs),
        });
    }
    if i32::from(num_segs) > i32::from(SEG_NONE) {
        return Err(FormatError::TooManySegments(num_segs));
    }
    for (field, value) in [
        ("code length", code_len),
        ("relocation table length", relocs_len),
        ("symbol table length", symbs_len),
    ] {
        if value < 0 {
            return Err(FormatError::NegativeField { field, value });
        }
    }
    if relocs_len % RELOC_ITEM_LEN as i32 != 0 {
        return Err(FormatError::RaggedTable {
            table: "relocation table",
            len: relocs_len,
        });
    }
    if symbs_len % SYMB_ENTRY_LEN as i32 != 0 {
        return Err(FormatError::RaggedTable {
            table: "symbol table",
            len: symbs_len,
        });
    }

    let header = Header {
        magic,
        num_segs,
        code_len,
        relocs_len,
        symbs_len,
    };

    let mut segments = Vec::with_capacity(num_segs as usize);
    for _ in 0..num_segs {
        let number = reader.read_u8("segment table")?;
        let kind = SegKind::from_raw(reader.read_u8("segment table")?)?;
        let length = reader.read_u16("segment table")?;
        segments.push(Segment {
            number,
            kind,
            length,
        });
    }

    let code = reader.read_bytes(code_len as usize, "code image")?.to_vec();

    let num_relocs = relocs_len as usize / RELOC_ITEM_LEN;
    let mut relocs = Vec::with_capacity(num_relocs.min(1024));
    for _ in 0..num_relocs {
        let segment = reader.read_u8("relocation table")?;
        let raw_kind = reader.read_u8("relocation table")?;
        let location = reader.read_u16("relocation table")?;
        let symbol = reader.read_u16("relocation table")?;
        if raw_kind == 0 {
            // tolerated padding row, not an error
            continue;
        }
        relocs.push(RelocItem {
            segment,
            kind: RelocKind::from_raw(raw_kind)?,
            location,
            symbol,
        });
    }

    let num_symbs = symbs_len as usize / SYMB_ENTRY_LEN;
    let mut symbols = Vec::with_capacity(num_symbs.min(1024));
    for _ in 0..num_symbs {
        let segment = reader.read_u8("symbol table")?;
        let kind = SymKind::from_raw(reader.read_u8("symbol table")?)?;
        let value = reader.read_u16("symbol table")?;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(reader.read_bytes(NAME_LEN, "symbol table")?);
        symbols.push(SymbolEntry {
            segment,
            kind,
            value,
            name: SymName(name),
        });
    }

    Ok(XoutObject {
        header,
        segments,
        code,
        relocs,
        symbols,
    })
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn read_u8(&mut self, what: &'static str) -> Result<u8, FormatError> {
        Ok(self.read_bytes(1, what)?[0])
    }

    fn read_u16(&mut self, what: &'static str) -> Result<u16, FormatError> {
        let bytes = self.read_bytes(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        let bytes = self.read_bytes(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, size: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        if self.pos + size > self.input.len() {
            return Err(FormatError::UnexpectedEof(what));
        }
        let begin = self.pos;
        self.pos += size;
        Ok(&self.input[begin..self.pos])
    }
}
