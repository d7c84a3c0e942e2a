//! Page type tags and the type-mask bitset used by polymorphic traversals.

use varstore_error::{Result, StoreError};

/// WAL frame page number reserved for commit markers.
pub const WAL_SENTINEL: u64 = u64::MAX;

/// On-disk page kind, stored as the first byte of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    /// Rope leaf holding element bytes.
    DataList = 1,
    /// Rope inner node holding cumulative byte counts.
    InnerNode = 2,
    /// Directory root (page 0): bucket heads.
    HashPage = 3,
    /// Directory bucket: name -> root-page tuples.
    HashLeaf = 4,
}

impl PageType {
    /// Decode a tag byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(Self::DataList),
            2 => Ok(Self::InnerNode),
            3 => Ok(Self::HashPage),
            4 => Ok(Self::HashLeaf),
            other => Err(StoreError::invalid_state(format!(
                "unknown page type tag {other}"
            ))),
        }
    }

    /// The tag byte written at offset 0 of the page.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Singleton mask containing only this type.
    #[must_use]
    pub const fn mask(self) -> PageTypeMask {
        match self {
            Self::DataList => PageTypeMask::DATA_LIST,
            Self::InnerNode => PageTypeMask::INNER_NODE,
            Self::HashPage => PageTypeMask::HASH_PAGE,
            Self::HashLeaf => PageTypeMask::HASH_LEAF,
        }
    }
}

bitflags::bitflags! {
    /// Set of acceptable page types for a typed page fetch.
    ///
    /// A traversal that can land on either an inner node or a leaf passes
    /// `INNER_NODE | DATA_LIST` instead of branching at the call site.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTypeMask: u8 {
        const DATA_LIST = 1 << 0;
        const INNER_NODE = 1 << 1;
        const HASH_PAGE = 1 << 2;
        const HASH_LEAF = 1 << 3;
    }
}

impl PageTypeMask {
    /// Whether `ty` is accepted by this mask.
    #[must_use]
    pub const fn accepts(self, ty: PageType) -> bool {
        self.contains(ty.mask())
    }
}
