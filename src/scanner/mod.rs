//! Suspendable scanner for DICOM-style containers.
//!
//! Locates the offset of a target tagged section by consuming record
//! headers and lengths only; intervening values are erased incrementally
//! and never buffered whole. The scan is driven entirely by
//! [`DicomScanner::feed`]: each call appends the next raw chunk and
//! advances as far as buffered input allows, returning
//! [`ScanStatus::NeedMore`] at the suspension point or
//! [`ScanStatus::Done`] with the final position.
//!
//! One scanner is one session over one [`StreamReader`]; it is not
//! resumable across invocations once finished.

mod tags;

pub use tags::{uids, Tag, TagDirectory, MODALITY, PIXEL_DATA, TRANSFER_SYNTAX_UID};

use crate::error::{Error, Result};
use crate::reader::{Step, StreamReader};
use bytes::Bytes;
use tracing::{debug, warn};

/// Sentinel length meaning "undefined" — the value runs until a delimiter.
pub const UNDEFINED_LENGTH: u32 = 0xffff_ffff;

/// Value representations encoded with a 2-byte length (the legacy explicit
/// format). Everything else uses 2 reserved bytes + a 4-byte length.
const SHORT_FORM_VRS: &[&str] = &[
    "AE", "AS", "AT", "CS", "DA", "DS", "DT", "FL", "FD", "IS", "LO", "LT", "PN", "SH", "SL",
    "SS", "ST", "TM", "UI", "UL", "US",
];

/// Value representations that may never declare an undefined length.
const NO_UNDEFINED_LENGTH_VRS: &[&str] = &["SV", "UC", "UR", "UV", "UT"];

/// How the dataset after the meta header is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEncoding {
    pub explicit_vr: bool,
    pub little_endian: bool,
}

impl TransferEncoding {
    /// File-meta headers are always explicit VR, little-endian.
    const META: TransferEncoding = TransferEncoding {
        explicit_vr: true,
        little_endian: true,
    };

    fn from_uid(uid: &str) -> Self {
        TransferEncoding {
            explicit_vr: uid != uids::IMPLICIT_VR_LITTLE_ENDIAN,
            little_endian: uid != uids::EXPLICIT_VR_BIG_ENDIAN,
        }
    }
}

/// A record header as encountered by the scan, with the value captured only
/// when small enough (see [`ScanOptions::capture_limit`]).
#[derive(Debug, Clone)]
pub struct DataElement {
    pub tag: Tag,
    pub vr: Option<String>,
    pub length: u32,
    pub value: Option<Bytes>,
}

/// Completed-scan summary.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Offset immediately after the matched tag's length field (plus any
    /// configured trailing skip).
    pub position: u64,
    pub encoding: TransferEncoding,
    pub transfer_syntax_uid: String,
}

/// Outcome of one `feed` call.
#[derive(Debug, Clone)]
pub enum ScanStatus {
    /// The scan suspended; feed the next raw chunk.
    NeedMore,
    /// The target tag was located.
    Done(ScanResult),
}

/// Scan configuration.
pub struct ScanOptions {
    pub tags: TagDirectory,
    /// Values at most this long are captured into [`DataElement::value`]
    /// for the element sink; longer values are skipped without buffering.
    pub capture_limit: usize,
    /// Extra bytes to consume after the matched tag's length field before
    /// reporting the final position.
    pub extra_trailing_skip: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            tags: TagDirectory::default(),
            capture_limit: 256,
            extra_trailing_skip: 0,
        }
    }
}

type StopPredicate = Box<dyn Fn(Tag) -> bool + Send>;
type ElementSink = Box<dyn FnMut(&DataElement) + Send>;

/// Parsed element header; `header_len` is its total encoded size.
#[derive(Debug, Clone)]
struct ElementHeader {
    tag: Tag,
    vr: Option<String>,
    length: u32,
    header_len: usize,
}

/// Open containers whose extent the scan is still inside.
#[derive(Debug, Clone, Copy)]
enum Container {
    /// A sequence value; `end` is absolute, `None` for undefined length.
    Sequence { end: Option<u64> },
    /// An undefined-length item, parsed element-by-element.
    Item,
}

#[derive(Debug)]
enum Phase {
    Preamble,
    Magic,
    /// File-meta element loop.
    Meta,
    /// Dataset element loop (including nested sequence content).
    Dataset,
    /// Erasing a defined-length value.
    SkipValue { remaining: u64 },
    /// Buffering a small value for capture.
    CaptureValue { header: ElementHeader },
    /// Scanning aligned 16-bit words for the delimiter sentinel.
    UndefinedValue,
    /// Consuming the configured trailing skip after a match.
    TrailingSkip { remaining: u64 },
    Done,
    /// Placeholder while a step runs; never observed between feeds.
    Transient,
}

enum Flow {
    Continue,
    NeedMore,
    Finished(u64),
}

/// Incremental scanner session over a tag/length/value container.
pub struct DicomScanner {
    reader: StreamReader,
    opts: ScanOptions,
    stop_at: StopPredicate,
    sink: Option<ElementSink>,
    phase: Phase,
    encoding: TransferEncoding,
    transfer_syntax: Option<String>,
    stack: Vec<Container>,
    in_meta: bool,
}

impl DicomScanner {
    /// Creates a session that stops at the first top-level element
    /// matching `stop_at`.
    pub fn new(stop_at: impl Fn(Tag) -> bool + Send + 'static) -> Self {
        Self::with_options(stop_at, ScanOptions::default())
    }

    pub fn with_options(
        stop_at: impl Fn(Tag) -> bool + Send + 'static,
        opts: ScanOptions,
    ) -> Self {
        Self {
            reader: StreamReader::new(),
            opts,
            stop_at: Box::new(stop_at),
            sink: None,
            phase: Phase::Preamble,
            encoding: TransferEncoding::META,
            transfer_syntax: None,
            stack: Vec::new(),
            in_meta: true,
        }
    }

    /// Convenience constructor for the common stop-at-one-tag case.
    pub fn until_tag(target: Tag) -> Self {
        Self::new(move |tag| tag == target)
    }

    /// Registers a sink invoked once per element header in scan order.
    pub fn on_element(mut self, sink: impl FnMut(&DataElement) + Send + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Total bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Feeds the next raw chunk and advances the scan.
    ///
    /// Panics if called after the scan finished: a session covers exactly
    /// one parse.
    pub fn feed(&mut self, chunk: impl Into<Bytes>) -> Result<ScanStatus> {
        assert!(
            !matches!(self.phase, Phase::Done),
            "DicomScanner session already finished"
        );
        self.reader.feed(chunk);
        self.pump()
    }

    fn pump(&mut self) -> Result<ScanStatus> {
        loop {
            let phase = std::mem::replace(&mut self.phase, Phase::Transient);
            let flow = match phase {
                Phase::Preamble => self.step_preamble(),
                Phase::Magic => self.step_magic(),
                Phase::Meta => self.step_meta(),
                Phase::Dataset => self.step_dataset(),
                Phase::SkipValue { remaining } => self.step_skip_value(remaining),
                Phase::CaptureValue { header } => self.step_capture_value(header),
                Phase::UndefinedValue => self.step_undefined_value(),
                Phase::TrailingSkip { remaining } => self.step_trailing_skip(remaining),
                Phase::Done | Phase::Transient => unreachable!("scan already finished"),
            };
            let flow = match flow {
                Ok(flow) => flow,
                Err(err) => {
                    // Format errors end the session.
                    self.phase = Phase::Done;
                    return Err(err);
                }
            };
            match flow {
                Flow::Continue => {}
                Flow::NeedMore => return Ok(ScanStatus::NeedMore),
                Flow::Finished(position) => {
                    self.phase = Phase::Done;
                    return Ok(ScanStatus::Done(ScanResult {
                        position,
                        encoding: self.encoding,
                        transfer_syntax_uid: self
                            .transfer_syntax
                            .clone()
                            .unwrap_or_default(),
                    }));
                }
            }
        }
    }

    fn step_preamble(&mut self) -> Result<Flow> {
        match self.reader.seek(128) {
            Step::Pending => {
                self.phase = Phase::Preamble;
                Ok(Flow::NeedMore)
            }
            Step::Ready(()) => {
                self.phase = Phase::Magic;
                Ok(Flow::Continue)
            }
        }
    }

    fn step_magic(&mut self) -> Result<Flow> {
        match self.reader.read_ascii(4) {
            Step::Pending => {
                self.phase = Phase::Magic;
                Ok(Flow::NeedMore)
            }
            Step::Ready(magic) if magic == "DICM" => {
                self.phase = Phase::Meta;
                Ok(Flow::Continue)
            }
            Step::Ready(other) => Err(Error::format(format!(
                "bad magic: expected DICM, got {other:?}"
            ))),
        }
    }

    fn step_meta(&mut self) -> Result<Flow> {
        let tag = match self.peek_tag(TransferEncoding::META) {
            Step::Pending => {
                self.phase = Phase::Meta;
                return Ok(Flow::NeedMore);
            }
            Step::Ready(tag) => tag,
        };

        // The meta header ends at the first element outside the reserved
        // group. The declared transfer syntax takes over from here.
        if tag.group != self.opts.tags.meta_group {
            let uid = self
                .transfer_syntax
                .as_deref()
                .ok_or_else(|| Error::format("file meta header has no transfer syntax UID"))?;
            self.encoding = TransferEncoding::from_uid(uid);
            self.in_meta = false;
            debug!(
                transfer_syntax = uid,
                explicit_vr = self.encoding.explicit_vr,
                little_endian = self.encoding.little_endian,
                "meta header complete"
            );
            self.phase = Phase::Dataset;
            return Ok(Flow::Continue);
        }

        let header = match self.peek_header(TransferEncoding::META)? {
            Step::Pending => {
                self.phase = Phase::Meta;
                return Ok(Flow::NeedMore);
            }
            Step::Ready(header) => header,
        };
        if header.length == UNDEFINED_LENGTH {
            return Err(Error::format(format!(
                "undefined length on meta element {}",
                header.tag
            )));
        }
        if header.tag == self.opts.tags.transfer_syntax_uid
            && header.vr.as_deref() != Some("UI")
        {
            return Err(Error::format(
                "transfer syntax UID element does not have a VR of UI",
            ));
        }
        self.consume_header(&header);
        self.dispatch_value(header);
        Ok(Flow::Continue)
    }

    fn step_dataset(&mut self) -> Result<Flow> {
        let encoding = self.encoding;

        // A defined-length container is closed by position, not by tag.
        if let Some(Container::Sequence { end: Some(end) }) = self.stack.last() {
            if self.reader.position() >= *end {
                self.stack.pop();
                self.phase = Phase::Dataset;
                return Ok(Flow::Continue);
            }
        }

        match self.stack.last().copied() {
            Some(Container::Sequence { end }) => self.step_sequence(end, encoding),
            Some(Container::Item) | None => self.step_element(encoding),
        }
    }

    /// Inside a sequence value: expect an item or the sequence delimiter.
    fn step_sequence(&mut self, end: Option<u64>, encoding: TransferEncoding) -> Result<Flow> {
        let mut buf = [0u8; 8];
        if self.reader.peek_at(0, &mut buf).is_pending() {
            self.phase = Phase::Dataset;
            return Ok(Flow::NeedMore);
        }
        let tag = tag_from(&buf[..4], encoding.little_endian);
        let length = u32_from(&buf[4..8], encoding.little_endian);

        if tag == self.opts.tags.item {
            self.consume_exact(8);
            if length == UNDEFINED_LENGTH {
                self.stack.push(Container::Item);
                self.phase = Phase::Dataset;
            } else if length > 0 {
                // Defined-length items need no structural tracking.
                self.phase = Phase::SkipValue {
                    remaining: length as u64,
                };
            } else {
                self.phase = Phase::Dataset;
            }
            return Ok(Flow::Continue);
        }

        if tag == self.opts.tags.sequence_delimiter && end.is_none() {
            // Delimiter tag plus its 4-byte zero length.
            self.consume_exact(8);
            self.stack.pop();
            self.phase = Phase::Dataset;
            return Ok(Flow::Continue);
        }

        Err(Error::format(format!(
            "unexpected element {tag} inside sequence value"
        )))
    }

    /// Top-level dataset or undefined-length item content: one element.
    fn step_element(&mut self, encoding: TransferEncoding) -> Result<Flow> {
        let tag = match self.peek_tag(encoding) {
            Step::Pending => {
                self.phase = Phase::Dataset;
                return Ok(Flow::NeedMore);
            }
            Step::Ready(tag) => tag,
        };

        if matches!(self.stack.last(), Some(Container::Item))
            && tag == self.opts.tags.item_delimiter
        {
            let mut buf = [0u8; 8];
            if self.reader.peek_at(0, &mut buf).is_pending() {
                self.phase = Phase::Dataset;
                return Ok(Flow::NeedMore);
            }
            self.consume_exact(8);
            self.stack.pop();
            self.phase = Phase::Dataset;
            return Ok(Flow::Continue);
        }

        if self.stack.is_empty() && (self.stop_at)(tag) {
            // Consume the matched tag, VR, and length field so the reported
            // position points at the start of its value.
            let header = match self.peek_header(encoding)? {
                Step::Pending => {
                    self.phase = Phase::Dataset;
                    return Ok(Flow::NeedMore);
                }
                Step::Ready(header) => header,
            };
            self.consume_header(&header);
            debug!(%tag, position = self.reader.position(), "target tag located");
            return self.step_trailing_skip(self.opts.extra_trailing_skip);
        }

        let header = match self.peek_header(encoding)? {
            Step::Pending => {
                self.phase = Phase::Dataset;
                return Ok(Flow::NeedMore);
            }
            Step::Ready(header) => header,
        };
        self.consume_header(&header);
        self.dispatch_value(header);
        Ok(Flow::Continue)
    }

    /// Routes a consumed header to the right value phase.
    fn dispatch_value(&mut self, header: ElementHeader) {
        let is_sequence = match header.vr.as_deref() {
            Some(vr) => vr == "SQ",
            // Implicit encodings only use undefined lengths for nested
            // item structures.
            None => header.length == UNDEFINED_LENGTH,
        };

        if is_sequence {
            self.emit_element(&header, None);
            if header.length == UNDEFINED_LENGTH {
                self.stack.push(Container::Sequence { end: None });
            } else if header.length > 0 {
                let end = self.reader.position() + header.length as u64;
                self.stack.push(Container::Sequence { end: Some(end) });
            }
            self.phase = Phase::Dataset;
            return;
        }

        if header.length == UNDEFINED_LENGTH {
            if let Some(vr) = header.vr.as_deref() {
                if NO_UNDEFINED_LENGTH_VRS.contains(&vr) {
                    warn!(tag = %header.tag, vr, "VR may not have undefined length");
                }
            }
            self.emit_element(&header, None);
            self.phase = Phase::UndefinedValue;
            return;
        }

        let capture = header.tag == self.opts.tags.transfer_syntax_uid && self.in_meta
            || (self.sink.is_some() && header.length as usize <= self.opts.capture_limit);
        if capture && header.length > 0 {
            self.phase = Phase::CaptureValue { header };
        } else {
            self.emit_element(&header, None);
            self.phase = if header.length > 0 {
                Phase::SkipValue {
                    remaining: header.length as u64,
                }
            } else {
                self.current_loop_phase()
            };
        }
    }

    fn step_skip_value(&mut self, remaining: u64) -> Result<Flow> {
        let left = remaining - self.reader.skip_available(remaining);
        if left == 0 {
            self.phase = self.current_loop_phase();
            Ok(Flow::Continue)
        } else {
            self.phase = Phase::SkipValue { remaining: left };
            Ok(Flow::NeedMore)
        }
    }

    fn step_capture_value(&mut self, header: ElementHeader) -> Result<Flow> {
        match self.reader.read(header.length as usize) {
            Step::Pending => {
                self.phase = Phase::CaptureValue { header };
                Ok(Flow::NeedMore)
            }
            Step::Ready(value) => {
                if header.tag == self.opts.tags.transfer_syntax_uid && self.in_meta {
                    self.transfer_syntax = Some(ascii_trimmed(&value));
                }
                self.emit_element(&header, Some(value));
                self.phase = self.current_loop_phase();
                Ok(Flow::Continue)
            }
        }
    }

    /// Scans aligned 16-bit words until the delimiter sentinel. The format
    /// guarantees even-length values, so alignment is preserved.
    fn step_undefined_value(&mut self) -> Result<Flow> {
        loop {
            let mut buf = [0u8; 4];
            if self.reader.peek_at(0, &mut buf).is_pending() {
                self.phase = Phase::UndefinedValue;
                return Ok(Flow::NeedMore);
            }
            let tag = tag_from(&buf, self.encoding.little_endian);
            if tag == self.opts.tags.sequence_delimiter {
                let mut full = [0u8; 8];
                if self.reader.peek_at(0, &mut full).is_pending() {
                    self.phase = Phase::UndefinedValue;
                    return Ok(Flow::NeedMore);
                }
                self.consume_exact(8);
                self.phase = self.current_loop_phase();
                return Ok(Flow::Continue);
            }
            self.consume_exact(2);
        }
    }

    fn step_trailing_skip(&mut self, remaining: u64) -> Result<Flow> {
        let left = remaining - self.reader.skip_available(remaining);
        if left == 0 {
            Ok(Flow::Finished(self.reader.position()))
        } else {
            self.phase = Phase::TrailingSkip { remaining: left };
            Ok(Flow::NeedMore)
        }
    }

    fn current_loop_phase(&self) -> Phase {
        if self.in_meta {
            Phase::Meta
        } else {
            Phase::Dataset
        }
    }

    /// Peeks the next element tag without consuming it.
    fn peek_tag(&mut self, encoding: TransferEncoding) -> Step<Tag> {
        let mut buf = [0u8; 4];
        match self.reader.peek_at(0, &mut buf) {
            Step::Pending => Step::Pending,
            Step::Ready(()) => Step::Ready(tag_from(&buf, encoding.little_endian)),
        }
    }

    /// Peeks a complete element header; nothing is consumed on `Pending`,
    /// so a tag is never read twice.
    fn peek_header(&mut self, encoding: TransferEncoding) -> Result<Step<ElementHeader>> {
        let mut head = [0u8; 8];
        if self.reader.peek_at(0, &mut head).is_pending() {
            return Ok(Step::Pending);
        }
        let tag = tag_from(&head[..4], encoding.little_endian);

        if !encoding.explicit_vr {
            let length = u32_from(&head[4..8], encoding.little_endian);
            return Ok(Step::Ready(ElementHeader {
                tag,
                vr: None,
                length,
                header_len: 8,
            }));
        }

        let vr_bytes = [head[4], head[5]];
        if !vr_bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(Error::format(format!(
                "element {tag} has a malformed VR"
            )));
        }
        let vr = String::from_utf8_lossy(&vr_bytes).into_owned();

        if SHORT_FORM_VRS.contains(&vr.as_str()) {
            let length = u16_from(&head[6..8], encoding.little_endian) as u32;
            return Ok(Step::Ready(ElementHeader {
                tag,
                vr: Some(vr),
                length,
                header_len: 8,
            }));
        }

        // Long form: 2 reserved bytes, then a 4-byte length.
        let mut long = [0u8; 12];
        if self.reader.peek_at(0, &mut long).is_pending() {
            return Ok(Step::Pending);
        }
        let length = u32_from(&long[8..12], encoding.little_endian);
        Ok(Step::Ready(ElementHeader {
            tag,
            vr: Some(vr),
            length,
            header_len: 12,
        }))
    }

    fn consume_header(&mut self, header: &ElementHeader) {
        self.consume_exact(header.header_len);
    }

    /// Consumes bytes already verified present by a peek.
    fn consume_exact(&mut self, len: usize) {
        match self.reader.seek(len) {
            Step::Ready(()) => {}
            Step::Pending => unreachable!("consume after successful peek"),
        }
    }

    fn emit_element(&mut self, header: &ElementHeader, value: Option<Bytes>) {
        if let Some(sink) = self.sink.as_mut() {
            let element = DataElement {
                tag: header.tag,
                vr: header.vr.clone(),
                length: header.length,
                value,
            };
            sink(&element);
        }
    }
}

fn tag_from(buf: &[u8], little_endian: bool) -> Tag {
    Tag::new(
        u16_from(&buf[..2], little_endian),
        u16_from(&buf[2..4], little_endian),
    )
}

fn u16_from(buf: &[u8], little_endian: bool) -> u16 {
    let pair = [buf[0], buf[1]];
    if little_endian {
        u16::from_le_bytes(pair)
    } else {
        u16::from_be_bytes(pair)
    }
}

fn u32_from(buf: &[u8], little_endian: bool) -> u32 {
    let quad = [buf[0], buf[1], buf[2], buf[3]];
    if little_endian {
        u32::from_le_bytes(quad)
    } else {
        u32::from_be_bytes(quad)
    }
}

/// ASCII conversion dropping padding NULs and whitespace, as used for UID
/// and code-string values.
pub fn ascii_trimmed(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds synthetic DICOM streams for the scan tests.
    struct FileBuilder {
        bytes: Vec<u8>,
        little_endian: bool,
    }

    impl FileBuilder {
        fn new() -> Self {
            let mut bytes = vec![0u8; 128];
            bytes.extend_from_slice(b"DICM");
            Self {
                bytes,
                little_endian: true,
            }
        }

        fn len(&self) -> u64 {
            self.bytes.len() as u64
        }

        fn big_endian(mut self) -> Self {
            self.little_endian = false;
            self
        }

        fn u16(&mut self, value: u16) {
            let encoded = if self.little_endian {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            self.bytes.extend_from_slice(&encoded);
        }

        fn u32(&mut self, value: u32) {
            let encoded = if self.little_endian {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            self.bytes.extend_from_slice(&encoded);
        }

        fn tag(&mut self, tag: Tag) {
            self.u16(tag.group);
            self.u16(tag.element);
        }

        /// Explicit-VR element with a value.
        fn explicit(&mut self, tag: Tag, vr: &str, value: &[u8]) {
            self.tag(tag);
            self.bytes.extend_from_slice(vr.as_bytes());
            if SHORT_FORM_VRS.contains(&vr) {
                self.u16(value.len() as u16);
            } else {
                self.bytes.extend_from_slice(&[0, 0]);
                self.u32(value.len() as u32);
            }
            self.bytes.extend_from_slice(value);
        }

        /// Long-form explicit header with an undefined length (no value).
        fn explicit_undefined(&mut self, tag: Tag, vr: &str) {
            self.tag(tag);
            self.bytes.extend_from_slice(vr.as_bytes());
            self.bytes.extend_from_slice(&[0, 0]);
            self.u32(UNDEFINED_LENGTH);
        }

        fn implicit(&mut self, tag: Tag, value: &[u8]) {
            self.tag(tag);
            self.u32(value.len() as u32);
            self.bytes.extend_from_slice(value);
        }

        /// Meta header: group length + transfer syntax. Meta is always
        /// explicit little-endian regardless of the declared syntax.
        fn meta(&mut self, transfer_syntax: &str) {
            let saved = self.little_endian;
            self.little_endian = true;
            self.explicit(Tag::new(0x0002, 0x0000), "UL", &[0, 0, 0, 0]);
            let mut uid = transfer_syntax.as_bytes().to_vec();
            if uid.len() % 2 == 1 {
                uid.push(0);
            }
            self.explicit(TRANSFER_SYNTAX_UID, "UI", &uid);
            self.little_endian = saved;
        }
    }

    fn scan_all(scanner: &mut DicomScanner, bytes: &[u8]) -> Result<ScanStatus> {
        scanner.feed(Bytes::copy_from_slice(bytes))
    }

    fn scan_byte_at_a_time(scanner: &mut DicomScanner, bytes: &[u8]) -> Result<ScanStatus> {
        for &b in bytes {
            match scanner.feed(Bytes::copy_from_slice(&[b]))? {
                ScanStatus::NeedMore => {}
                done @ ScanStatus::Done(_) => return Ok(done),
            }
        }
        Ok(ScanStatus::NeedMore)
    }

    fn expect_done(status: ScanStatus) -> ScanResult {
        match status {
            ScanStatus::Done(result) => result,
            ScanStatus::NeedMore => panic!("scan did not finish"),
        }
    }

    /// Explicit-VR file: filler elements, an undefined-length sequence
    /// with both defined and undefined items, then pixel data.
    fn explicit_file() -> (Vec<u8>, u64) {
        let mut f = FileBuilder::new();
        f.meta(uids::EXPLICIT_VR_LITTLE_ENDIAN);

        f.explicit(Tag::new(0x0008, 0x0060), "CS", b"CT");
        f.explicit(Tag::new(0x0008, 0x0018), "UI", b"1.2.3.40");
        f.explicit(Tag::new(0x0028, 0x0010), "US", &[0x00, 0x02]);

        // Undefined-length sequence with one defined and one undefined item.
        f.explicit_undefined(Tag::new(0x0008, 0x1140), "SQ");
        f.tag(Tag::new(0xfffe, 0xe000)); // item, defined length
        f.u32(10); // 8-byte element header + 2-byte value
        f.explicit(Tag::new(0x0008, 0x0100), "SH", b"AB");
        f.tag(Tag::new(0xfffe, 0xe000)); // item, undefined length
        f.u32(UNDEFINED_LENGTH);
        f.explicit(Tag::new(0x0008, 0x0100), "SH", b"CD");
        f.tag(Tag::new(0xfffe, 0xe00d)); // item delimiter
        f.u32(0);
        f.tag(Tag::new(0xfffe, 0xe0dd)); // sequence delimiter
        f.u32(0);

        // Undefined-length simple value, delimiter-terminated word scan.
        f.explicit_undefined(Tag::new(0x0042, 0x0011), "UN");
        f.bytes.extend_from_slice(&[0xaa; 6]);
        f.tag(Tag::new(0xfffe, 0xe0dd));
        f.u32(0);

        // Target: long-form header, position right after the length field.
        f.tag(PIXEL_DATA);
        f.bytes.extend_from_slice(b"OB");
        f.bytes.extend_from_slice(&[0, 0]);
        f.u32(16);
        let target = f.len();
        f.bytes.extend_from_slice(&[0x55; 16]);

        (f.bytes, target)
    }

    #[test]
    fn test_locates_pixel_data_in_one_feed() {
        let (bytes, target) = explicit_file();
        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let result = expect_done(scan_all(&mut scanner, &bytes).unwrap());
        assert_eq!(result.position, target);
        assert!(result.encoding.explicit_vr);
        assert!(result.encoding.little_endian);
        assert_eq!(result.transfer_syntax_uid, uids::EXPLICIT_VR_LITTLE_ENDIAN);
    }

    #[test]
    fn test_feed_granularity_does_not_change_result() {
        let (bytes, target) = explicit_file();
        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let result = expect_done(scan_byte_at_a_time(&mut scanner, &bytes).unwrap());
        assert_eq!(result.position, target);
    }

    #[test]
    fn test_implicit_transfer_syntax() {
        let mut f = FileBuilder::new();
        f.meta(uids::IMPLICIT_VR_LITTLE_ENDIAN);
        f.implicit(Tag::new(0x0008, 0x0060), b"MR");
        f.implicit(Tag::new(0x0028, 0x0011), &[0, 1]);
        f.tag(PIXEL_DATA);
        f.u32(4);
        let target = f.len();
        f.bytes.extend_from_slice(&[1, 2, 3, 4]);

        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let result = expect_done(scan_all(&mut scanner, &f.bytes).unwrap());
        assert_eq!(result.position, target);
        assert!(!result.encoding.explicit_vr);
    }

    #[test]
    fn test_big_endian_transfer_syntax() {
        let mut f = FileBuilder::new().big_endian();
        f.meta(uids::EXPLICIT_VR_BIG_ENDIAN);
        f.explicit(Tag::new(0x0008, 0x0060), "CS", b"US");
        f.tag(PIXEL_DATA);
        f.bytes.extend_from_slice(b"OW");
        f.bytes.extend_from_slice(&[0, 0]);
        f.u32(6);
        let target = f.len();
        f.bytes.extend_from_slice(&[0; 6]);

        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let result = expect_done(scan_all(&mut scanner, &f.bytes).unwrap());
        assert_eq!(result.position, target);
        assert!(!result.encoding.little_endian);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"NOPE");
        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let err = scan_all(&mut scanner, &bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_missing_transfer_syntax_is_format_error() {
        let mut f = FileBuilder::new();
        // Meta group with no transfer syntax element.
        f.explicit(Tag::new(0x0002, 0x0000), "UL", &[0, 0, 0, 0]);
        f.implicit(Tag::new(0x0008, 0x0060), b"CT");

        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        let err = scan_all(&mut scanner, &f.bytes).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_stop_tag_inside_sequence_is_not_a_match() {
        let mut f = FileBuilder::new();
        f.meta(uids::EXPLICIT_VR_LITTLE_ENDIAN);
        // Sequence containing an element whose tag equals the target.
        f.explicit_undefined(Tag::new(0x0008, 0x1140), "SQ");
        f.tag(Tag::new(0xfffe, 0xe000));
        f.u32(UNDEFINED_LENGTH);
        f.explicit(Tag::new(0x0010, 0x0010), "PN", b"N^");
        f.tag(Tag::new(0xfffe, 0xe00d));
        f.u32(0);
        f.tag(Tag::new(0xfffe, 0xe0dd));
        f.u32(0);
        // The real target follows at top level.
        f.tag(Tag::new(0x0010, 0x0010));
        f.bytes.extend_from_slice(b"PN");
        f.u16(4);
        let target = f.len();
        f.bytes.extend_from_slice(b"X^Y ");

        let mut scanner = DicomScanner::until_tag(Tag::new(0x0010, 0x0010));
        let result = expect_done(scan_all(&mut scanner, &f.bytes).unwrap());
        assert_eq!(result.position, target);
    }

    #[test]
    fn test_extra_trailing_skip() {
        let (bytes, target) = explicit_file();
        let mut scanner = DicomScanner::with_options(
            |tag| tag == PIXEL_DATA,
            ScanOptions {
                extra_trailing_skip: 8,
                ..ScanOptions::default()
            },
        );
        let result = expect_done(scan_all(&mut scanner, &bytes).unwrap());
        assert_eq!(result.position, target + 8);
    }

    #[test]
    fn test_element_sink_sees_headers_and_small_values() {
        let (bytes, _) = explicit_file();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_seen = seen.clone();

        let mut scanner = DicomScanner::until_tag(PIXEL_DATA).on_element(move |el| {
            sink_seen
                .lock()
                .unwrap()
                .push((el.tag, el.value.clone()));
        });
        expect_done(scan_all(&mut scanner, &bytes).unwrap());

        let seen = seen.lock().unwrap();
        let modality = seen
            .iter()
            .find(|(tag, _)| *tag == Tag::new(0x0008, 0x0060))
            .expect("modality element observed");
        assert_eq!(modality.1.as_deref(), Some(b"CT".as_ref()));
    }

    #[test]
    #[should_panic(expected = "already finished")]
    fn test_feed_after_done_panics() {
        let (bytes, _) = explicit_file();
        let mut scanner = DicomScanner::until_tag(PIXEL_DATA);
        expect_done(scan_all(&mut scanner, &bytes).unwrap());
        let _ = scanner.feed(Bytes::from_static(b"more"));
    }
}
