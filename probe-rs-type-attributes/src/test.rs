//! Helper functions for testing

use std::{
    cell::Cell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use gimli::{AttributeValue, DebugInfoOffset, Reader, RunTimeEndian, UnitSectionOffset};
use typed_path::{TypedPath, TypedPathBuf};

use crate::{
    die_node::{DieAttribute, DieNode, FormValue},
    execution_context::{ExecutionContext, StackFrameContext},
    DebugError, DebugInfo, GimliReader,
};

/// Create a reader over a copy of `data`.
pub(crate) fn reader(data: &[u8]) -> GimliReader {
    gimli::EndianReader::new(Rc::from(data), RunTimeEndian::Little)
}

/// An inline string attribute value (`DW_FORM_string`).
pub(crate) fn string(value: &str) -> AttributeValue<GimliReader> {
    AttributeValue::String(reader(value.as_bytes()))
}

/// The offset of a unit in `.debug_info`.
pub(crate) fn unit_offset(offset: usize) -> UnitSectionOffset {
    UnitSectionOffset::DebugInfoOffset(DebugInfoOffset(offset))
}

/// An empty DWARF 5 compilation unit for the given address size.
pub(crate) fn new_dwarf_unit(address_size: u8) -> gimli::write::DwarfUnit {
    gimli::write::DwarfUnit::new(gimli::Encoding {
        format: gimli::Format::Dwarf32,
        version: 5,
        address_size,
    })
}

/// Write `dwarf` into little endian sections and load them again.
pub(crate) fn load_debug_info(dwarf: &mut gimli::write::DwarfUnit) -> DebugInfo {
    let mut sections = new_sections();
    dwarf.write(&mut sections).expect("DWARF can be written");
    load_sections(&sections)
}

/// Write all units of `dwarf` into little endian sections and load them again.
pub(crate) fn load_debug_info_units(dwarf: &mut gimli::write::Dwarf) -> DebugInfo {
    let mut sections = new_sections();
    dwarf.write(&mut sections).expect("DWARF can be written");
    load_sections(&sections)
}

fn new_sections() -> gimli::write::Sections<gimli::write::EndianVec<RunTimeEndian>> {
    gimli::write::Sections::new(gimli::write::EndianVec::new(RunTimeEndian::Little))
}

fn load_sections(
    sections: &gimli::write::Sections<gimli::write::EndianVec<RunTimeEndian>>,
) -> DebugInfo {
    let mut data: Vec<(gimli::SectionId, Vec<u8>)> = Vec::new();
    sections
        .for_each(|id, section| -> Result<(), ()> {
            data.push((id, section.slice().to_vec()));
            Ok(())
        })
        .expect("sections can be collected");

    DebugInfo::from_sections(RunTimeEndian::Little, |id| {
        data.iter()
            .find(|(section, _)| *section == id)
            .map(|(_, bytes)| bytes.clone())
    })
    .expect("DWARF can be read")
}

/// An in-memory DIE.
///
/// References are resolved through the `references` of the DIE the lookup starts from, keyed by
/// the offset of a `DW_FORM_ref*` value.
#[derive(Debug, Clone)]
pub(crate) struct MockDie {
    pub(crate) tag: gimli::DwTag,
    pub(crate) valid: bool,
    attributes: Vec<DieAttribute>,
    children: Vec<MockDie>,
    references: BTreeMap<usize, MockDie>,
    files: Vec<(UnitSectionOffset, u64, String)>,
    resolved_references: Rc<Cell<usize>>,
}

impl MockDie {
    pub(crate) fn new(tag: gimli::DwTag) -> Self {
        Self {
            tag,
            valid: true,
            attributes: vec![],
            children: vec![],
            references: BTreeMap::new(),
            files: vec![],
            resolved_references: Rc::new(Cell::new(0)),
        }
    }

    /// A handle which does not point at a DIE.
    pub(crate) fn invalid() -> Self {
        Self {
            valid: false,
            ..Self::new(gimli::DW_TAG_null)
        }
    }

    /// Add an attribute read from the unit at offset 0.
    pub(crate) fn with(self, name: gimli::DwAt, value: AttributeValue<GimliReader>) -> Self {
        self.with_in_unit(name, value, unit_offset(0))
    }

    /// Add an attribute read from the given unit.
    pub(crate) fn with_in_unit(
        mut self,
        name: gimli::DwAt,
        value: AttributeValue<GimliReader>,
        unit: UnitSectionOffset,
    ) -> Self {
        self.attributes
            .push(DieAttribute::new(name, FormValue::new(value, unit)));
        self
    }

    pub(crate) fn with_child(mut self, child: MockDie) -> Self {
        self.children.push(child);
        self
    }

    /// Make `target` reachable through a reference with the given offset.
    pub(crate) fn with_reference(mut self, offset: usize, target: MockDie) -> Self {
        self.references.insert(offset, target);
        self
    }

    pub(crate) fn with_file(mut self, unit: UnitSectionOffset, index: u64, path: &str) -> Self {
        self.files.push((unit, index, path.to_string()));
        self
    }

    /// How many references have been followed, starting from this DIE.
    pub(crate) fn resolved_references(&self) -> usize {
        self.resolved_references.get()
    }
}

impl DieNode for MockDie {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn tag(&self) -> gimli::DwTag {
        self.tag
    }

    fn attributes(&self) -> Vec<DieAttribute> {
        self.attributes.clone()
    }

    fn children(&self) -> Vec<Self> {
        self.children.clone()
    }

    fn resolve_reference(&self, value: &FormValue) -> Option<Self> {
        self.resolved_references
            .set(self.resolved_references.get() + 1);

        let offset = match value.value {
            AttributeValue::UnitRef(offset) => offset.0,
            AttributeValue::DebugInfoRef(offset) => offset.0,
            _ => return None,
        };
        self.references.get(&offset).cloned()
    }

    fn string_value(&self, value: &FormValue) -> Option<String> {
        match &value.value {
            AttributeValue::String(string) => {
                string.to_string_lossy().ok().map(|s| s.into_owned())
            }
            _ => None,
        }
    }

    fn file_path(&self, unit: UnitSectionOffset, file_index: u64) -> Option<TypedPathBuf> {
        self.files
            .iter()
            .find(|(file_unit, index, _)| *file_unit == unit && *index == file_index)
            .map(|(_, _, path)| TypedPath::derive(path).to_path_buf())
    }
}

/// A stack frame with canned evaluation results.
#[derive(Debug, Default)]
pub(crate) struct MockFrame {
    variables: HashMap<String, gimli::Value>,
    evaluations: Cell<usize>,
}

impl MockFrame {
    pub(crate) fn with_variable(mut self, name: &str, value: gimli::Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    /// How often a variable was evaluated in this frame.
    pub(crate) fn evaluations(&self) -> usize {
        self.evaluations.get()
    }
}

impl StackFrameContext for MockFrame {
    fn evaluate_variable(&self, name: &str) -> Result<gimli::Value, DebugError> {
        self.evaluations.set(self.evaluations.get() + 1);
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| DebugError::UnknownVariable(name.to_string()))
    }
}

/// An execution context which may or may not have a selected frame.
#[derive(Debug, Default)]
pub(crate) struct MockContext {
    pub(crate) frame: Option<MockFrame>,
}

impl MockContext {
    pub(crate) fn with_frame(frame: MockFrame) -> Self {
        Self { frame: Some(frame) }
    }
}

impl ExecutionContext for MockContext {
    fn current_frame(&self) -> Option<&dyn StackFrameContext> {
        self.frame
            .as_ref()
            .map(|frame| frame as &dyn StackFrameContext)
    }
}
