use gimli::{AttributeValue, UnitSectionOffset};
use typed_path::TypedPathBuf;

use crate::GimliReader;

/// The raw value of an attribute, together with the unit it was read from.
///
/// The unit matters for values that are relative to a unit, e.g. `DW_FORM_ref4` references or
/// `DW_AT_decl_file` indices. An attribute can be inherited from another unit through a
/// `DW_AT_specification` that uses `DW_FORM_ref_addr`, so the unit of the attribute is not
/// necessarily the unit of the DIE being inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormValue {
    /// The undecoded attribute value, as read with [`gimli::Attribute::raw_value`].
    pub value: AttributeValue<GimliReader>,
    /// The unit that owns this attribute occurrence.
    pub unit: UnitSectionOffset,
}

impl FormValue {
    /// Create a new form value.
    pub fn new(value: AttributeValue<GimliReader>, unit: UnitSectionOffset) -> Self {
        Self { value, unit }
    }

    /// Interpret the value as an unsigned constant.
    ///
    /// Signed constants are reinterpreted, flags become `0` or `1`, and references yield their offset.
    /// Returns `None` for values that have no numeric interpretation, e.g. strings or expressions.
    pub fn unsigned(&self) -> Option<u64> {
        let value = match self.value {
            AttributeValue::Data1(value) => value as u64,
            AttributeValue::Data2(value) => value as u64,
            AttributeValue::Data4(value) => value as u64,
            AttributeValue::Data8(value) => value,
            AttributeValue::Udata(value) => value,
            AttributeValue::Sdata(value) => value as u64,
            AttributeValue::Flag(value) => value as u64,
            AttributeValue::FileIndex(value) => value,
            AttributeValue::Accessibility(access) => access.0 as u64,
            AttributeValue::Virtuality(virtuality) => virtuality.0 as u64,
            AttributeValue::Encoding(encoding) => encoding.0 as u64,
            AttributeValue::CallingConvention(convention) => convention.0 as u64,
            AttributeValue::Inline(inline) => inline.0 as u64,
            AttributeValue::Language(language) => language.0 as u64,
            AttributeValue::UnitRef(offset) => offset.0 as u64,
            AttributeValue::DebugInfoRef(offset) => offset.0 as u64,
            AttributeValue::DebugTypesRef(signature) => signature.0,
            _ => return None,
        };
        Some(value)
    }

    /// Interpret the value as a signed constant.
    ///
    /// Fixed size data is sign extended from its encoded width.
    pub fn signed(&self) -> Option<i64> {
        match self.value {
            AttributeValue::Udata(value) => Some(value as i64),
            ref value => value.sdata_value().or_else(|| self.unsigned().map(|u| u as i64)),
        }
    }

    /// Interpret the value as a boolean.
    ///
    /// Flags are taken as is, every other numeric value is true when it is non-zero.
    pub fn boolean(&self) -> bool {
        match self.value {
            AttributeValue::Flag(value) => value,
            _ => self.unsigned().is_some_and(|value| value != 0),
        }
    }

    /// Returns `true` if the value refers to another DIE, rather than being a constant.
    pub fn is_reference(&self) -> bool {
        matches!(
            self.value,
            AttributeValue::UnitRef(_)
                | AttributeValue::DebugInfoRef(_)
                | AttributeValue::DebugInfoRefSup(_)
                | AttributeValue::DebugTypesRef(_)
        )
    }
}

/// A single attribute of a DIE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DieAttribute {
    /// The attribute kind, e.g. `DW_AT_name`.
    pub name: gimli::DwAt,
    /// The raw value of the attribute.
    pub value: FormValue,
}

impl DieAttribute {
    /// Create a new attribute.
    pub fn new(name: gimli::DwAt, value: FormValue) -> Self {
        Self { name, value }
    }
}

/// A read-only view of a DIE in the debug information tree.
///
/// Implementations decide how attributes are read, how references are followed and how strings
/// and file names are looked up. [`crate::GimliDie`] is the implementation for DWARF data loaded
/// with gimli.
pub trait DieNode: Sized {
    /// Returns `false` if this handle does not point at a readable DIE.
    fn is_valid(&self) -> bool;

    /// The tag of the DIE, e.g. `DW_TAG_array_type`.
    fn tag(&self) -> gimli::DwTag;

    /// The attributes of the DIE, in the order they should be applied.
    ///
    /// Later occurrences of the same attribute take precedence over earlier ones.
    fn attributes(&self) -> Vec<DieAttribute>;

    /// The direct children of the DIE, in the order they appear in the debug information.
    fn children(&self) -> Vec<Self>;

    /// Follow a reference value to the DIE it points to.
    fn resolve_reference(&self, value: &FormValue) -> Option<Self>;

    /// Read a string value, e.g. from `DW_FORM_string` or `DW_FORM_strp`.
    fn string_value(&self, value: &FormValue) -> Option<String>;

    /// Resolve a `DW_AT_decl_file` index in the file table of the given unit.
    fn file_path(&self, unit: UnitSectionOffset, file_index: u64) -> Option<TypedPathBuf>;

    /// The value of `DW_AT_name`, if the DIE has one.
    fn name(&self) -> Option<String> {
        let name = self
            .attributes()
            .into_iter()
            .filter(|attribute| attribute.name == gimli::DW_AT_name)
            .last()?;
        self.string_value(&name.value)
    }
}
