//! Tag identifiers and the structural tag directory.
//!
//! The scan loop never hard-codes group/element numbers; everything
//! structural comes from a [`TagDirectory`] so alternate dialects can be
//! described by configuration. Defaults follow the DICOM standard.

use std::fmt;

/// A (group, element) tag pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04x},{:04x})", self.group, self.element)
    }
}

/// Pixel Data.
pub const PIXEL_DATA: Tag = Tag::new(0x7fe0, 0x0010);
/// Transfer Syntax UID.
pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
/// Modality.
pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);

/// Transfer syntax UIDs that change how the dataset is decoded.
pub mod uids {
    pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
    pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
}

/// Structural tags the scanner must recognize, supplied as configuration.
#[derive(Debug, Clone, Copy)]
pub struct TagDirectory {
    /// Group reserved for the file-meta header.
    pub meta_group: u16,
    /// Element inside the meta group declaring the transfer encoding.
    pub transfer_syntax_uid: Tag,
    /// Start-of-item marker inside sequence values.
    pub item: Tag,
    /// End marker for an undefined-length item.
    pub item_delimiter: Tag,
    /// End marker for an undefined-length value.
    pub sequence_delimiter: Tag,
}

impl Default for TagDirectory {
    fn default() -> Self {
        Self {
            meta_group: 0x0002,
            transfer_syntax_uid: TRANSFER_SYNTAX_UID,
            item: Tag::new(0xfffe, 0xe000),
            item_delimiter: Tag::new(0xfffe, 0xe00d),
            sequence_delimiter: Tag::new(0xfffe, 0xe0dd),
        }
    }
}
