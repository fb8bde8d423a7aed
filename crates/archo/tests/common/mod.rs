//! Synthetic Mach-O images for integration tests.

#![allow(dead_code)]

use archo::macho::FieldCodec;
use goblin::mach::constants::cputype::{CPU_TYPE_ARM, CPU_TYPE_ARM64};
use goblin::mach::header::{MH_DYLIB, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64};
use goblin::mach::load_command::{
    LC_CODE_SIGNATURE, LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_SEGMENT, LC_SEGMENT_64, LC_SYMTAB,
};
use std::path::{Path, PathBuf};

pub const TEXT_PATTERN: u8 = 0x5a;
pub const LINKEDIT_PATTERN: u8 = 0xab;
pub const TRAILING_PATTERN: u8 = 0xee;

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Layout knobs for a generated slice.
///
/// The image is laid out as: header, load commands, `padding` zero bytes,
/// a `__TEXT,__text` section of `text_size` bytes, `__TEXT` padded to a page,
/// then `__LINKEDIT` holding `linkedit_size` bytes of symbol data, the
/// optional signature region and `after_signature` more bytes of data, then
/// the optional trailing segment.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub is_64: bool,
    pub big_endian: bool,
    pub execute: bool,
    pub padding: usize,
    pub dylibs: Vec<(&'static str, bool)>,
    pub text_size: usize,
    pub linkedit_size: usize,
    /// Size of a zero-filled `LC_CODE_SIGNATURE` region.
    pub signature: Option<usize>,
    /// Bytes of `__LINKEDIT` data placed after the signature region.
    pub after_signature: usize,
    pub trailing_segment: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            is_64: true,
            big_endian: false,
            execute: true,
            padding: 512,
            dylibs: vec![
                ("/usr/lib/libSystem.B.dylib", false),
                ("/System/Library/Frameworks/Foundation.framework/Foundation", false),
                ("@rpath/libOptional.dylib", true),
            ],
            text_size: 0x1800,
            linkedit_size: 0x120,
            signature: None,
            after_signature: 0,
            trailing_segment: false,
        }
    }
}

/// Offsets of the generated image, for assertions.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub header_size: usize,
    pub sizeofcmds: usize,
    pub section_offset: usize,
    pub text_end: usize,
    pub linkedit_offset: usize,
    pub signature_offset: Option<usize>,
    pub linkedit_end: usize,
    pub trailing_offset: Option<usize>,
    pub file_len: usize,
}

fn align(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

fn dylib_cmdsize(path: &str) -> usize {
    24 + (path.len() / 8 + 1) * 8
}

struct Writer {
    out: Vec<u8>,
    codec: FieldCodec,
    is_64: bool,
    pos: usize,
}

impl Writer {
    fn u32(&mut self, value: u32) {
        self.codec.write_u32(&mut self.out, self.pos, value).unwrap();
        self.pos += 4;
    }

    fn word(&mut self, value: u64) {
        self.codec
            .write_word(&mut self.out, self.pos, value, self.is_64)
            .unwrap();
        self.pos += if self.is_64 { 8 } else { 4 };
    }

    fn name(&mut self, name: &str) {
        self.out[self.pos..self.pos + name.len()].copy_from_slice(name.as_bytes());
        self.pos += 16;
    }

    fn segment(&mut self, name: &str, vmaddr: u64, fileoff: usize, filesize: usize, nsects: u32) {
        let (cmd, size) = if self.is_64 { (LC_SEGMENT_64, 72) } else { (LC_SEGMENT, 56) };
        let sect = if self.is_64 { 80 } else { 68 };
        self.u32(cmd);
        self.u32(size + sect * nsects);
        self.name(name);
        self.word(vmaddr);
        self.word(align(filesize.max(1), 0x4000) as u64);
        self.word(fileoff as u64);
        self.word(filesize as u64);
        self.u32(5);
        self.u32(5);
        self.u32(nsects);
        self.u32(0);
    }
}

impl Fixture {
    pub fn layout(&self) -> Layout {
        let header_size = if self.is_64 { 32 } else { 28 };
        let (segment, section) = if self.is_64 { (72, 80) } else { (56, 68) };
        let mut sizeofcmds = segment + section + segment + 24;
        sizeofcmds += self.dylibs.iter().map(|(p, _)| dylib_cmdsize(p)).sum::<usize>();
        if self.signature.is_some() {
            sizeofcmds += 16;
        }
        if self.trailing_segment {
            sizeofcmds += segment;
        }

        let section_offset = header_size + sizeofcmds + self.padding;
        let text_end = align(section_offset + self.text_size, 0x1000);
        let linkedit_offset = text_end;
        let symbols_end = linkedit_offset + align(self.linkedit_size, 16);
        let (signature_offset, linkedit_end) = match self.signature {
            Some(size) => (Some(symbols_end), symbols_end + size + self.after_signature),
            None => (None, linkedit_offset + self.linkedit_size),
        };
        let trailing_offset = self.trailing_segment.then_some(linkedit_end);
        let file_len = linkedit_end + if self.trailing_segment { 0x100 } else { 0 };

        Layout {
            header_size,
            sizeofcmds,
            section_offset,
            text_end,
            linkedit_offset,
            signature_offset,
            linkedit_end,
            trailing_offset,
            file_len,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let layout = self.layout();
        let codec = if self.big_endian { FieldCodec::big() } else { FieldCodec::little() };
        let mut w = Writer {
            out: vec![0u8; layout.file_len],
            codec,
            is_64: self.is_64,
            pos: 0,
        };
        let base: u64 = if self.is_64 { 0x1_0000_0000 } else { 0x4000 };

        w.u32(if self.is_64 { MH_MAGIC_64 } else { MH_MAGIC });
        w.u32(if self.is_64 { CPU_TYPE_ARM64 } else { CPU_TYPE_ARM });
        w.u32(0);
        w.u32(if self.execute { MH_EXECUTE } else { MH_DYLIB });
        let ncmds = 3
            + self.dylibs.len()
            + usize::from(self.signature.is_some())
            + usize::from(self.trailing_segment);
        w.u32(ncmds as u32);
        w.u32(layout.sizeofcmds as u32);
        w.u32(0x0020_0085);
        if self.is_64 {
            w.u32(0);
        }

        w.segment("__TEXT", base, 0, layout.text_end, 1);
        w.name("__text");
        w.name("__TEXT");
        w.word(base + layout.section_offset as u64);
        w.word(self.text_size as u64);
        w.u32(layout.section_offset as u32);
        w.u32(2);
        w.u32(0);
        w.u32(0);
        w.u32(0x8000_0400);
        w.u32(0);
        w.u32(0);
        if self.is_64 {
            w.u32(0);
        }

        for (path, weak) in &self.dylibs {
            let size = dylib_cmdsize(path);
            let start = w.pos;
            w.u32(if *weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB });
            w.u32(size as u32);
            w.u32(24);
            w.u32(2);
            w.u32(0x0001_0000);
            w.u32(0x0001_0000);
            w.out[w.pos..w.pos + path.len()].copy_from_slice(path.as_bytes());
            w.pos = start + size;
        }

        w.segment(
            "__LINKEDIT",
            base + layout.linkedit_offset as u64,
            layout.linkedit_offset,
            layout.linkedit_end - layout.linkedit_offset,
            0,
        );

        w.u32(LC_SYMTAB);
        w.u32(24);
        w.u32(layout.linkedit_offset as u32);
        w.u32(4);
        w.u32((layout.linkedit_offset + 0x40) as u32);
        w.u32(0x20);

        if let (Some(offset), Some(size)) = (layout.signature_offset, self.signature) {
            w.u32(LC_CODE_SIGNATURE);
            w.u32(16);
            w.u32(offset as u32);
            w.u32(size as u32);
        }

        if let Some(offset) = layout.trailing_offset {
            w.segment("__EXTRA", base + 0x10_0000, offset, 0x100, 0);
        }
        assert_eq!(w.pos, layout.header_size + layout.sizeofcmds);

        let text = layout.section_offset..layout.section_offset + self.text_size;
        w.out[text].fill(TEXT_PATTERN);
        let symbols = layout.linkedit_offset..layout.linkedit_offset + self.linkedit_size;
        w.out[symbols].fill(LINKEDIT_PATTERN);
        if let (Some(offset), Some(size)) = (layout.signature_offset, self.signature) {
            w.out[offset + size..layout.linkedit_end].fill(LINKEDIT_PATTERN);
        }
        if let Some(offset) = layout.trailing_offset {
            w.out[offset..offset + 0x100].fill(TRAILING_PATTERN);
        }
        w.out
    }
}
