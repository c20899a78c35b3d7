use std::str::from_utf8;

use gimli::{DebugInfoOffset, UnitOffset, UnitSectionOffset};
use typed_path::{TypedPath, TypedPathBuf};

use crate::{DebugError, GimliReader};

/// A struct containing information about a single compilation unit.
pub struct UnitInfo {
    pub(crate) unit: gimli::Unit<GimliReader>,
}

impl UnitInfo {
    /// Create a new `UnitInfo` from a `gimli::Unit`.
    pub fn new(unit: gimli::Unit<GimliReader>) -> Self {
        Self { unit }
    }

    /// The offset of the unit header in its section.
    pub fn offset(&self) -> UnitSectionOffset {
        self.unit.header.offset()
    }

    /// Convert a `.debug_info` offset to an offset within this unit, if the unit contains it.
    pub(crate) fn unit_offset(&self, offset: DebugInfoOffset) -> Option<UnitOffset> {
        offset.to_unit_offset(&self.unit.header)
    }

    /// The signature of the type described by this unit, if it is a type unit.
    pub(crate) fn type_signature(&self) -> Option<(gimli::DebugTypeSignature, UnitOffset)> {
        match self.unit.header.type_() {
            gimli::UnitType::Type {
                type_signature,
                type_offset,
            }
            | gimli::UnitType::SplitType {
                type_signature,
                type_offset,
            } => Some((type_signature, type_offset)),
            _ => None,
        }
    }

    /// Resolve a file index from the line program header of this unit.
    ///
    /// The directory of the file, and the compilation directory of the unit if the result is still
    /// relative, are prepended to the file name.
    pub(crate) fn file_path(
        &self,
        dwarf: &gimli::Dwarf<GimliReader>,
        file_index: u64,
    ) -> Option<TypedPathBuf> {
        let line_program = self.unit.line_program.as_ref()?;
        let header = line_program.header();
        let Some(file_entry) = header.file(file_index) else {
            tracing::warn!(
                "Unable to extract file entry for file_index {:?}.",
                file_index
            );
            return None;
        };
        let file_name_attr_string = dwarf.attr_string(&self.unit, file_entry.path_name()).ok()?;
        let name_path = from_utf8(&file_name_attr_string).ok()?;

        let dir_name_attr_string = file_entry
            .directory(header)
            .and_then(|dir| dwarf.attr_string(&self.unit, dir).ok());

        let dir_path = dir_name_attr_string.and_then(|dir_name| {
            from_utf8(&dir_name)
                .ok()
                .map(|p| TypedPath::derive(p).to_path_buf())
        });

        let mut combined_path = match dir_path {
            Some(dir_path) => dir_path.join(name_path),
            None => TypedPath::derive(name_path).to_path_buf(),
        };

        if combined_path.is_relative() {
            let comp_dir = self
                .unit
                .comp_dir
                .as_ref()
                .map(|dir| from_utf8(dir))
                .transpose()
                .ok()?
                .map(TypedPath::derive);
            if let Some(comp_dir) = comp_dir {
                combined_path = comp_dir.join(&combined_path);
            }
        }

        Some(combined_path)
    }

    /// Find the `DW_TAG_subprogram` whose address ranges contain `address`.
    pub(crate) fn function_containing(
        &self,
        dwarf: &gimli::Dwarf<GimliReader>,
        address: u64,
    ) -> Result<Option<UnitOffset>, DebugError> {
        tracing::trace!("Searching Function DIE for address {:#010x}", address);

        let mut entries_cursor = self.unit.entries();
        while let Some((_depth, current)) = entries_cursor.next_dfs()? {
            if current.tag() != gimli::DW_TAG_subprogram {
                continue;
            }

            let mut ranges = dwarf.die_ranges(&self.unit, current)?;
            while let Some(range) = ranges.next()? {
                // Subprograms with a low_pc of 0 overlap with the valid functions, they were
                // removed by the linker.
                if range.begin == 0 {
                    break;
                }
                if range.begin <= address && address < range.end {
                    return Ok(Some(current.offset()));
                }
            }
        }

        Ok(None)
    }
}
