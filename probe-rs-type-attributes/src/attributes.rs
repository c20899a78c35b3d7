use serde::Serialize;
use typed_path::TypedPathBuf;

use crate::{
    accessibility::{map_accessibility, AccessLevel},
    die_node::{DieNode, FormValue},
    flags::AttributeFlags,
    serialize_typed_path,
};

// Not defined by gimli.
#[allow(non_upper_case_globals)]
const DW_AT_APPLE_objc_direct: gimli::DwAt = gimli::DwAt(0x3fee);

/// The declaration coordinates of a DIE (`DW_AT_decl_file`, `DW_AT_decl_line` and `DW_AT_decl_column`).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    /// The path of the source file.
    #[serde(serialize_with = "serialize_typed_path")]
    pub file: Option<TypedPathBuf>,
    /// The line number in the source file.
    pub line: Option<u64>,
    /// The column number in the source file.
    pub column: Option<u64>,
}

/// A reference to another DIE which has not been followed yet.
///
/// Following references while parsing attributes could recurse without bound through cyclic
/// type graphs, so the raw value is kept and the caller decides when to resolve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredDie(FormValue);

impl DeferredDie {
    /// The raw attribute value, together with the unit it was read from.
    pub fn form_value(&self) -> &FormValue {
        &self.0
    }

    /// Follow the reference, using `die` to look up the referenced DIE.
    pub fn resolve<N: DieNode>(&self, die: &N) -> Option<N> {
        die.resolve_reference(&self.0)
    }
}

/// The attributes of a DIE that are relevant for type reconstruction.
///
/// Some attributes are relevant for all kinds of types (e.g. the declaration), while
/// others are only meaningful for a specific kind of type (e.g. virtuality).
#[derive(Debug, Clone)]
pub struct ParsedAttributes<N> {
    /// `DW_AT_accessibility`
    pub accessibility: AccessLevel,
    /// `DW_AT_linkage_name`, or the older `DW_AT_MIPS_linkage_name`.
    pub mangled_name: Option<String>,
    /// `DW_AT_name`, empty if the DIE has no name.
    pub name: String,
    /// Where the entity was declared.
    pub declaration: Declaration,
    /// `DW_AT_object_pointer`, the DIE of the implicit object parameter of a member function.
    pub object_pointer: Option<N>,
    /// `DW_AT_abstract_origin`
    pub abstract_origin: Option<DeferredDie>,
    /// `DW_AT_containing_type`
    pub containing_type: Option<DeferredDie>,
    /// `DW_AT_signature`, a type signature referring to a type unit.
    pub signature: Option<DeferredDie>,
    /// `DW_AT_specification`
    pub specification: Option<DeferredDie>,
    /// `DW_AT_type`
    pub type_ref: Option<DeferredDie>,
    /// `DW_AT_APPLE_runtime_class`
    pub class_language: Option<gimli::DwLang>,
    /// `DW_AT_byte_size`. A missing size is different from a size of zero.
    pub byte_size: Option<u64>,
    /// `DW_AT_calling_convention`
    pub calling_convention: gimli::DwCc,
    /// `DW_AT_bit_stride`, zero if not present.
    pub bit_stride: u64,
    /// `DW_AT_byte_stride`, zero if not present.
    pub byte_stride: u64,
    /// `DW_AT_encoding`
    pub encoding: gimli::DwAte,
    flags: AttributeFlags,
}

impl<N> Default for ParsedAttributes<N> {
    fn default() -> Self {
        Self {
            accessibility: AccessLevel::None,
            mangled_name: None,
            name: String::new(),
            declaration: Declaration::default(),
            object_pointer: None,
            abstract_origin: None,
            containing_type: None,
            signature: None,
            specification: None,
            type_ref: None,
            class_language: None,
            byte_size: None,
            calling_convention: gimli::DW_CC_normal,
            bit_stride: 0,
            byte_stride: 0,
            encoding: gimli::DwAte(0),
            flags: AttributeFlags::default(),
        }
    }
}

impl<N: DieNode> ParsedAttributes<N> {
    /// Decode all attributes of `die` in a single pass.
    ///
    /// This never fails. Attributes which are not relevant for type reconstruction, including
    /// attributes unknown to this crate, are ignored, and attributes with values that cannot be
    /// decoded leave the corresponding field at its default.
    pub fn normalize(die: &N) -> Self {
        let mut parsed = Self::default();

        for attribute in die.attributes() {
            let value = &attribute.value;

            tracing::trace!("Normalizing {} : {:?}", attribute.name, value.value);

            match attribute.name {
                gimli::DW_AT_abstract_origin => {
                    parsed.abstract_origin = Some(DeferredDie(value.clone()));
                }
                gimli::DW_AT_accessibility => {
                    parsed.accessibility = map_accessibility(value.unsigned().unwrap_or_default());
                }
                gimli::DW_AT_artificial => {
                    if value.boolean() {
                        parsed.flags.set_artificial(true);
                    }
                }
                gimli::DW_AT_bit_stride => {
                    parsed.bit_stride = value.unsigned().unwrap_or_default();
                }
                gimli::DW_AT_byte_size => match value.unsigned() {
                    Some(byte_size) => parsed.byte_size = Some(byte_size),
                    None => {
                        tracing::debug!("Unimplemented: DW_AT_byte_size value: {:?}", value.value);
                    }
                },
                gimli::DW_AT_byte_stride => {
                    parsed.byte_stride = value.unsigned().unwrap_or_default();
                }
                gimli::DW_AT_calling_convention => {
                    if let Some(convention) = value.unsigned() {
                        parsed.calling_convention = gimli::DwCc(convention as u8);
                    }
                }
                gimli::DW_AT_containing_type => {
                    parsed.containing_type = Some(DeferredDie(value.clone()));
                }
                gimli::DW_AT_decl_file => {
                    // The file index belongs to the unit of the attribute, which can differ from
                    // the unit of `die` if the attribute was inherited through a `DW_FORM_ref_addr`.
                    parsed.declaration.file = value
                        .unsigned()
                        .and_then(|file_index| die.file_path(value.unit, file_index));
                }
                gimli::DW_AT_decl_line => {
                    parsed.declaration.line = value.unsigned();
                }
                gimli::DW_AT_decl_column => {
                    parsed.declaration.column = value.unsigned();
                }
                gimli::DW_AT_declaration => {
                    if value.boolean() {
                        parsed.flags.set_forward_declaration(true);
                    }
                }
                gimli::DW_AT_encoding => {
                    if let Some(encoding) = value.unsigned() {
                        parsed.encoding = gimli::DwAte(encoding as u8);
                    }
                }
                gimli::DW_AT_enum_class => {
                    if value.boolean() {
                        parsed.flags.set_scoped_enum(true);
                    }
                }
                gimli::DW_AT_explicit => {
                    if value.boolean() {
                        parsed.flags.set_explicit(true);
                    }
                }
                gimli::DW_AT_external => {
                    if value.unsigned().is_some_and(|external| external != 0) {
                        parsed.flags.set_external(true);
                    }
                }
                gimli::DW_AT_inline => {
                    if value.boolean() {
                        parsed.flags.set_inline(true);
                    }
                }
                gimli::DW_AT_linkage_name | gimli::DW_AT_MIPS_linkage_name => {
                    parsed.mangled_name = die.string_value(value);
                }
                gimli::DW_AT_name => {
                    parsed.name = die.string_value(value).unwrap_or_default();
                }
                gimli::DW_AT_object_pointer => {
                    parsed.object_pointer = die.resolve_reference(value);
                }
                gimli::DW_AT_signature => {
                    parsed.signature = Some(DeferredDie(value.clone()));
                }
                gimli::DW_AT_specification => {
                    parsed.specification = Some(DeferredDie(value.clone()));
                }
                gimli::DW_AT_type => {
                    parsed.type_ref = Some(DeferredDie(value.clone()));
                }
                gimli::DW_AT_virtuality => {
                    if value.boolean() {
                        parsed.flags.set_virtual(true);
                    }
                }
                gimli::DW_AT_APPLE_objc_complete_type => {
                    if value.signed().is_some_and(|complete| complete != 0) {
                        parsed.flags.set_objc_complete_type(true);
                    }
                }
                DW_AT_APPLE_objc_direct => {
                    if value.boolean() {
                        parsed.flags.set_objc_direct_call(true);
                    }
                }
                gimli::DW_AT_APPLE_runtime_class => {
                    parsed.class_language =
                        value.signed().map(|language| gimli::DwLang(language as u16));
                }
                gimli::DW_AT_GNU_vector => {
                    if value.boolean() {
                        parsed.flags.set_vector(true);
                    }
                }
                gimli::DW_AT_export_symbols => {
                    if value.boolean() {
                        parsed.flags.set_exports_symbols(true);
                    }
                }
                _ => {}
            }
        }

        parsed
    }
}

impl<N> ParsedAttributes<N> {
    /// The boolean properties of the DIE.
    pub fn flags(&self) -> AttributeFlags {
        self.flags
    }
}
