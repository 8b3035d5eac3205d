// kernel/src/memory/elf.rs
//
// Executable images.  The loader only needs the entry point and the list
// of LOAD segments; `ElfImage` reads them out of an ELF64 file with
// xmas-elf.  `ElfBuilder` writes the small static executables the hosted
// machine and the tests hand to the loader.

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use xmas_elf::{ElfFile, program};

bitflags! {
    /// ELF `p_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1 << 0;
        const WRITE = 1 << 1;
        const READ = 1 << 2;
    }
}

/// One loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub va: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub flags: SegmentFlags,
}

/// What the loader consumes.
pub trait ExecutableImage {
    fn entry_point(&self) -> u64;
    /// LOAD segments only.
    fn load_segments(&self) -> Vec<Segment>;
    /// File contents the segment offsets index into.
    fn data(&self) -> &[u8];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    Parse(&'static str),
    SegmentOutsideFile { va: u64 },
    FileLargerThanMemory { va: u64 },
    SegmentOutsideUser { va: u64 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Parse(msg) => write!(f, "bad ELF: {}", msg),
            ImageError::SegmentOutsideFile { va } => {
                write!(f, "segment at {:#x} reads past end of file", va)
            }
            ImageError::FileLargerThanMemory { va } => {
                write!(f, "segment at {:#x} has filesz > memsz", va)
            }
            ImageError::SegmentOutsideUser { va } => {
                write!(f, "segment at {:#x} extends above UTOP", va)
            }
        }
    }
}

// ============================================================================
// ELF parsing
// ============================================================================

pub struct ElfImage<'a> {
    elf: ElfFile<'a>,
}

impl<'a> ElfImage<'a> {
    /// `data` must be 8-byte aligned (xmas-elf reads headers in place).
    pub fn parse(data: &'a [u8]) -> Result<Self, ImageError> {
        let elf = ElfFile::new(data).map_err(ImageError::Parse)?;
        Ok(Self { elf })
    }
}

impl ExecutableImage for ElfImage<'_> {
    fn entry_point(&self) -> u64 {
        self.elf.header.pt2.entry_point()
    }

    fn load_segments(&self) -> Vec<Segment> {
        self.elf
            .program_iter()
            .filter(|h| h.get_type() == Ok(program::Type::Load))
            .map(|h| {
                let flags = h.flags();
                let mut seg_flags = SegmentFlags::empty();
                if flags.is_execute() {
                    seg_flags |= SegmentFlags::EXECUTE;
                }
                if flags.is_write() {
                    seg_flags |= SegmentFlags::WRITE;
                }
                if flags.is_read() {
                    seg_flags |= SegmentFlags::READ;
                }
                Segment {
                    offset: h.offset(),
                    va: h.virtual_addr(),
                    file_size: h.file_size(),
                    mem_size: h.mem_size(),
                    flags: seg_flags,
                }
            })
            .collect()
    }

    fn data(&self) -> &[u8] {
        self.elf.input
    }
}

// ============================================================================
// ELF writing
// ============================================================================

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PT_LOAD: u32 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3e;

/// Image bytes kept in u64 storage so the headers are 8-byte aligned.
#[derive(Clone)]
pub struct ElfBytes {
    words: Vec<u64>,
    len: usize,
}

impl ElfBytes {
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = vec![0u64; bytes.len().div_ceil(8)];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks(8)) {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            *word = u64::from_ne_bytes(raw);
        }
        Self {
            words,
            len: bytes.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes
        unsafe { core::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn parse(&self) -> Result<ElfImage<'_>, ImageError> {
        ElfImage::parse(self.as_bytes())
    }
}

struct PendingSegment {
    va: u64,
    data: Vec<u8>,
    mem_size: u64,
    flags: SegmentFlags,
}

/// Minimal static ELF64 executable writer.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<PendingSegment>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    /// Add a LOAD segment.  `mem_size` below `data.len()` is raised to it.
    pub fn segment(mut self, va: u64, data: &[u8], mem_size: u64, flags: SegmentFlags) -> Self {
        self.segments.push(PendingSegment {
            va,
            data: data.to_vec(),
            mem_size: mem_size.max(data.len() as u64),
            flags,
        });
        self
    }

    pub fn build(&self) -> ElfBytes {
        let phnum = self.segments.len();
        let mut out = vec![0u8; EHDR_SIZE + phnum * PHDR_SIZE];

        // ── ELF header ──
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // 64-bit
        out[5] = 1; // little endian
        out[6] = 1; // version
        out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        out[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[24..32].copy_from_slice(&self.entry.to_le_bytes());
        out[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        // ── program headers, file data appended after them ──
        for (i, seg) in self.segments.iter().enumerate() {
            while out.len() % 16 != 0 {
                out.push(0);
            }
            let offset = out.len() as u64;
            out.extend_from_slice(&seg.data);

            let ph = EHDR_SIZE + i * PHDR_SIZE;
            out[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
            out[ph + 4..ph + 8].copy_from_slice(&seg.flags.bits().to_le_bytes());
            out[ph + 8..ph + 16].copy_from_slice(&offset.to_le_bytes());
            out[ph + 16..ph + 24].copy_from_slice(&seg.va.to_le_bytes());
            out[ph + 24..ph + 32].copy_from_slice(&seg.va.to_le_bytes());
            out[ph + 32..ph + 40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
            out[ph + 40..ph + 48].copy_from_slice(&seg.mem_size.to_le_bytes());
            out[ph + 48..ph + 56].copy_from_slice(&0x1000u64.to_le_bytes());
        }

        ElfBytes::from_bytes(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_image_parses_back() {
        let bytes = ElfBuilder::new(0x40_0010)
            .segment(0x40_0000, &[0xcc; 32], 0x1000, SegmentFlags::READ | SegmentFlags::EXECUTE)
            .segment(0x40_1000, b"data", 0x2000, SegmentFlags::READ | SegmentFlags::WRITE)
            .build();
        let image = bytes.parse().unwrap();

        assert_eq!(image.entry_point(), 0x40_0010);
        let segs = image.load_segments();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].va, 0x40_0000);
        assert_eq!(segs[0].file_size, 32);
        assert_eq!(segs[0].mem_size, 0x1000);
        assert!(segs[0].flags.contains(SegmentFlags::EXECUTE));
        assert_eq!(segs[1].flags, SegmentFlags::READ | SegmentFlags::WRITE);

        let off = segs[1].offset as usize;
        assert_eq!(&image.data()[off..off + 4], b"data");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut raw = ElfBuilder::new(0).build().as_bytes().to_vec();
        raw[1] = b'X';
        let bytes = ElfBytes::from_bytes(&raw);
        assert!(matches!(bytes.parse(), Err(ImageError::Parse(_))));
    }
}
