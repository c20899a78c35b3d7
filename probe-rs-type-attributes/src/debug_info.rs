use super::{
    die_node::{DieAttribute, DieNode, FormValue},
    unit_info::UnitInfo,
    DebugError, GimliReader,
};
use gimli::{AttributeValue, DebugInfoOffset, Reader, RunTimeEndian, UnitOffset, UnitSectionOffset};
use object::read::{Object, ObjectSection};
use std::{borrow, fmt, path::Path, rc::Rc};
use typed_path::TypedPathBuf;

/// How many `DW_AT_specification` / `DW_AT_abstract_origin` links are followed when collecting
/// the attributes of a DIE.
pub const MAX_INHERITANCE_DEPTH: usize = 8;

/// Debug information which is parsed from DWARF debugging information.
pub struct DebugInfo {
    pub(crate) dwarf: gimli::Dwarf<GimliReader>,
    pub(crate) unit_infos: Vec<UnitInfo>,
    pub(crate) endianness: RunTimeEndian,
}

impl DebugInfo {
    /// Read debug info directly from a ELF file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<DebugInfo, DebugError> {
        let data = std::fs::read(path.as_ref())?;

        DebugInfo::from_raw(&data)
    }

    /// Parse debug information directly from a buffer containing an ELF file.
    pub fn from_raw(data: &[u8]) -> Result<Self, DebugError> {
        let object = object::File::parse(data)?;

        let endianness = if object.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        DebugInfo::load(endianness, |id| {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or_else(|| borrow::Cow::Borrowed(&[][..]));
            Rc::from(&*data)
        })
    }

    /// Build debug information from the contents of individual DWARF sections.
    ///
    /// `section` returns the bytes of a section, or `None` if the section is not present.
    pub fn from_sections<F>(endianness: RunTimeEndian, section: F) -> Result<Self, DebugError>
    where
        F: Fn(gimli::SectionId) -> Option<Vec<u8>>,
    {
        DebugInfo::load(endianness, |id| {
            Rc::from(section(id).unwrap_or_default().into_boxed_slice())
        })
    }

    fn load<F>(endianness: RunTimeEndian, section_data: F) -> Result<Self, DebugError>
    where
        F: Fn(gimli::SectionId) -> Rc<[u8]>,
    {
        let load_section = |id: gimli::SectionId| -> Result<GimliReader, gimli::Error> {
            Ok(gimli::EndianReader::new(section_data(id), endianness))
        };

        let dwarf = gimli::Dwarf::load(&load_section)?;

        let mut unit_infos = Vec::new();

        let mut iter = dwarf.units();
        loop {
            let header = match iter.next() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!("Stopped reading unit headers: {:?}", error);
                    break;
                }
            };

            let offset = header.offset();
            match dwarf.unit(header) {
                Ok(unit) => unit_infos.push(UnitInfo::new(unit)),
                Err(error) => tracing::warn!("Skipping unit at {:?}: {:?}", offset, error),
            }
        }

        Ok(DebugInfo {
            dwarf,
            unit_infos,
            endianness,
        })
    }

    /// All units found in the debug information, in section order.
    pub fn unit_infos(&self) -> &[UnitInfo] {
        &self.unit_infos
    }

    /// The unit whose header is at `offset`.
    pub fn unit_info(&self, offset: UnitSectionOffset) -> Option<&UnitInfo> {
        self.unit_infos
            .iter()
            .find(|unit_info| unit_info.offset() == offset)
    }

    /// The DIE at the given offset in `.debug_info`, searching all units.
    pub fn die_at_offset(&self, offset: DebugInfoOffset) -> Option<GimliDie<'_>> {
        self.unit_infos.iter().find_map(|unit_info| {
            let unit_offset = unit_info.unit_offset(offset)?;
            let die = GimliDie::new(self, unit_info, unit_offset);
            die.is_valid().then_some(die)
        })
    }

    /// The first DIE with the given tag and `DW_AT_name`, in unit order.
    pub fn find_die(&self, tag: gimli::DwTag, name: &str) -> Option<GimliDie<'_>> {
        for unit_info in &self.unit_infos {
            let mut entries = unit_info.unit.entries();
            while let Ok(Some((_, entry))) = entries.next_dfs() {
                if entry.tag() != tag {
                    continue;
                }
                let die = GimliDie::new(self, unit_info, entry.offset());
                if die.name().as_deref() == Some(name) {
                    return Some(die);
                }
            }
        }
        None
    }

    /// The type DIE of the type unit with the given signature.
    pub(crate) fn type_unit_die(
        &self,
        signature: gimli::DebugTypeSignature,
    ) -> Option<GimliDie<'_>> {
        self.unit_infos.iter().find_map(|unit_info| {
            let (type_signature, type_offset) = unit_info.type_signature()?;
            (type_signature == signature).then(|| GimliDie::new(self, unit_info, type_offset))
        })
    }

    /// The program binary's endianness.
    pub fn endianness(&self) -> RunTimeEndian {
        self.endianness
    }
}

pub(crate) type Die<'debug_info> =
    gimli::DebuggingInformationEntry<'debug_info, 'debug_info, GimliReader>;

/// A DIE in [`DebugInfo`], identified by its unit and its offset in that unit.
#[derive(Clone, Copy)]
pub struct GimliDie<'debug_info> {
    debug_info: &'debug_info DebugInfo,
    unit_info: &'debug_info UnitInfo,
    offset: UnitOffset,
}

impl<'debug_info> GimliDie<'debug_info> {
    pub(crate) fn new(
        debug_info: &'debug_info DebugInfo,
        unit_info: &'debug_info UnitInfo,
        offset: UnitOffset,
    ) -> Self {
        Self {
            debug_info,
            unit_info,
            offset,
        }
    }

    /// The offset of the DIE in its unit.
    pub fn offset(&self) -> UnitOffset {
        self.offset
    }

    /// The unit containing the DIE.
    pub fn unit_info(&self) -> &'debug_info UnitInfo {
        self.unit_info
    }

    /// The offset of the DIE in `.debug_info`, if the unit lives in that section.
    pub fn debug_info_offset(&self) -> Option<DebugInfoOffset> {
        self.offset.to_debug_info_offset(&self.unit_info.unit.header)
    }

    pub(crate) fn entry(&self) -> Result<Die<'debug_info>, DebugError> {
        Ok(self.unit_info.unit.entry(self.offset)?)
    }

    /// A DIE in the same unit.
    pub(crate) fn at_offset(&self, offset: UnitOffset) -> Self {
        Self::new(self.debug_info, self.unit_info, offset)
    }

    fn collect_attributes(&self, attributes: &mut Vec<DieAttribute>, depth: usize) {
        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!("Unable to read DIE at {:?}: {:?}", self.offset, error);
                return;
            }
        };
        let unit = self.unit_info.offset();

        let mut attrs = entry.attrs();
        loop {
            let attr = match attrs.next() {
                Ok(Some(attr)) => attr,
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(
                        "Unable to read attributes of DIE at {:?}: {:?}",
                        self.offset,
                        error
                    );
                    break;
                }
            };

            let name = attr.name();
            if depth > 0 && matches!(name, gimli::DW_AT_sibling | gimli::DW_AT_declaration) {
                continue;
            }

            let value = FormValue::new(attr.raw_value(), unit);
            let inherited = matches!(
                name,
                gimli::DW_AT_specification | gimli::DW_AT_abstract_origin
            )
            .then(|| value.clone());
            attributes.push(DieAttribute::new(name, value));

            let Some(reference) = inherited else {
                continue;
            };
            if depth >= MAX_INHERITANCE_DEPTH {
                tracing::warn!(
                    "Not following {} of DIE at {:?}, the chain is longer than {} links.",
                    name,
                    self.offset,
                    MAX_INHERITANCE_DEPTH
                );
                continue;
            }
            match self.resolve_reference(&reference) {
                Some(origin) => origin.collect_attributes(attributes, depth + 1),
                None => tracing::debug!(
                    "Unable to resolve {} of DIE at {:?}: {:?}",
                    name,
                    self.offset,
                    reference.value
                ),
            }
        }
    }
}

impl fmt::Debug for GimliDie<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GimliDie")
            .field("unit", &self.unit_info.offset())
            .field("offset", &self.offset)
            .finish()
    }
}

impl PartialEq for GimliDie<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.unit_info.offset() == other.unit_info.offset() && self.offset == other.offset
    }
}

impl DieNode for GimliDie<'_> {
    fn is_valid(&self) -> bool {
        self.entry().is_ok()
    }

    fn tag(&self) -> gimli::DwTag {
        self.entry()
            .map(|entry| entry.tag())
            .unwrap_or(gimli::DW_TAG_null)
    }

    fn attributes(&self) -> Vec<DieAttribute> {
        let mut attributes = Vec::new();
        self.collect_attributes(&mut attributes, 0);
        attributes
    }

    fn children(&self) -> Vec<Self> {
        let mut tree = match self.unit_info.unit.entries_tree(Some(self.offset)) {
            Ok(tree) => tree,
            Err(error) => {
                tracing::warn!("Unable to read DIE at {:?}: {:?}", self.offset, error);
                return vec![];
            }
        };
        let root = match tree.root() {
            Ok(root) => root,
            Err(error) => {
                tracing::warn!("Unable to read DIE at {:?}: {:?}", self.offset, error);
                return vec![];
            }
        };

        let mut dies = vec![];
        let mut children = root.children();
        loop {
            match children.next() {
                Ok(Some(child)) => dies.push(self.at_offset(child.entry().offset())),
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(
                        "Unable to read children of DIE at {:?}: {:?}",
                        self.offset,
                        error
                    );
                    break;
                }
            }
        }
        dies
    }

    fn resolve_reference(&self, value: &FormValue) -> Option<Self> {
        let die = match value.value {
            AttributeValue::UnitRef(offset) => {
                let unit_info = self.debug_info.unit_info(value.unit)?;
                GimliDie::new(self.debug_info, unit_info, offset)
            }
            AttributeValue::DebugInfoRef(offset) => self.debug_info.die_at_offset(offset)?,
            AttributeValue::DebugTypesRef(signature) => {
                self.debug_info.type_unit_die(signature)?
            }
            ref other => {
                tracing::debug!("Unimplemented: reference with value {:?}", other);
                return None;
            }
        };
        die.is_valid().then_some(die)
    }

    fn string_value(&self, value: &FormValue) -> Option<String> {
        let unit_info = self.debug_info.unit_info(value.unit)?;
        let string = self
            .debug_info
            .dwarf
            .attr_string(&unit_info.unit, value.value.clone())
            .map_err(|error| {
                tracing::debug!("Unable to read string value {:?}: {:?}", value.value, error)
            })
            .ok()?;
        string
            .to_string_lossy()
            .ok()
            .map(|string| string.into_owned())
    }

    fn file_path(&self, unit: UnitSectionOffset, file_index: u64) -> Option<TypedPathBuf> {
        self.debug_info
            .unit_info(unit)?
            .file_path(&self.debug_info.dwarf, file_index)
    }
}

#[cfg(test)]
mod test {
    use super::{DebugInfo, MAX_INHERITANCE_DEPTH};
    use crate::{
        test::{load_debug_info, load_debug_info_units, new_dwarf_unit},
        AccessLevel, DieNode, ParsedAttributes,
    };
    use gimli::write::{
        AttributeValue, FileId, LineProgram, LineString, Reference, Unit, UnitEntryId,
    };
    use pretty_assertions::assert_eq;
    use typed_path::TypedPath;

    fn name(dwarf: &mut gimli::write::DwarfUnit, id: UnitEntryId, name: &str) {
        dwarf
            .unit
            .get_mut(id)
            .set(gimli::DW_AT_name, AttributeValue::String(name.into()));
    }

    #[test]
    fn tree_navigation() {
        let mut dwarf = new_dwarf_unit(8);
        let root = dwarf.unit.root();
        let structure = dwarf.unit.add(root, gimli::DW_TAG_structure_type);
        name(&mut dwarf, structure, "Point");
        for field in ["x", "y"] {
            let member = dwarf.unit.add(structure, gimli::DW_TAG_member);
            name(&mut dwarf, member, field);
        }

        let debug_info = load_debug_info(&mut dwarf);
        assert_eq!(debug_info.unit_infos().len(), 1);

        let point = debug_info
            .find_die(gimli::DW_TAG_structure_type, "Point")
            .expect("Point is defined");
        assert!(point.is_valid());
        assert_eq!(point.tag(), gimli::DW_TAG_structure_type);

        let members: Vec<_> = point
            .children()
            .iter()
            .map(|member| (member.tag(), member.name()))
            .collect();
        assert_eq!(
            members,
            vec![
                (gimli::DW_TAG_member, Some("x".to_string())),
                (gimli::DW_TAG_member, Some("y".to_string())),
            ]
        );

        let offset = point.debug_info_offset().unwrap();
        assert_eq!(debug_info.die_at_offset(offset), Some(point));
        assert!(debug_info
            .find_die(gimli::DW_TAG_structure_type, "Line")
            .is_none());
    }

    #[test]
    fn string_forms() {
        let mut dwarf = new_dwarf_unit(4);
        let root = dwarf.unit.root();
        let inline = dwarf.unit.add(root, gimli::DW_TAG_base_type);
        name(&mut dwarf, inline, "int");
        let indirect = dwarf.unit.add(root, gimli::DW_TAG_base_type);
        let string = dwarf.strings.add("char");
        dwarf
            .unit
            .get_mut(indirect)
            .set(gimli::DW_AT_name, AttributeValue::StringRef(string));

        let debug_info = load_debug_info(&mut dwarf);
        assert!(debug_info.find_die(gimli::DW_TAG_base_type, "int").is_some());
        assert!(debug_info.find_die(gimli::DW_TAG_base_type, "char").is_some());
    }

    #[test]
    fn specification_attributes_are_inherited() {
        let mut dwarf = new_dwarf_unit(8);
        let root = dwarf.unit.root();
        let class = dwarf.unit.add(root, gimli::DW_TAG_class_type);
        name(&mut dwarf, class, "Widget");

        let declaration = dwarf.unit.add(class, gimli::DW_TAG_subprogram);
        name(&mut dwarf, declaration, "draw");
        let entry = dwarf.unit.get_mut(declaration);
        entry.set(gimli::DW_AT_declaration, AttributeValue::Flag(true));
        entry.set(gimli::DW_AT_external, AttributeValue::Flag(true));
        entry.set(
            gimli::DW_AT_accessibility,
            AttributeValue::Accessibility(gimli::DW_ACCESS_protected),
        );
        entry.set(gimli::DW_AT_decl_line, AttributeValue::Udata(12));

        let definition = dwarf.unit.add(root, gimli::DW_TAG_subprogram);
        let entry = dwarf.unit.get_mut(definition);
        entry.set(
            gimli::DW_AT_specification,
            AttributeValue::UnitRef(declaration),
        );
        entry.set(gimli::DW_AT_decl_line, AttributeValue::Udata(40));
        entry.set(gimli::DW_AT_low_pc, AttributeValue::Udata(0x1000));

        let debug_info = load_debug_info(&mut dwarf);
        let draw = first_with_low_pc(&debug_info, 0);

        assert_eq!(draw.name(), Some("draw".to_string()));

        let parsed = ParsedAttributes::normalize(&draw);
        assert_eq!(parsed.name, "draw");
        assert_eq!(parsed.accessibility, AccessLevel::Protected);
        assert!(parsed.flags().is_external());
        // The declaration of the definition is not inherited.
        assert!(!parsed.flags().is_forward_declaration());
        // The line of the definition follows the specification, so it wins.
        assert_eq!(parsed.declaration.line, Some(40));
        assert_eq!(
            parsed
                .specification
                .as_ref()
                .and_then(|specification| specification.resolve(&draw))
                .and_then(|specification| specification.name()),
            Some("draw".to_string())
        );
    }

    fn first_with_low_pc(debug_info: &DebugInfo, unit: usize) -> crate::GimliDie<'_> {
        let unit_info = &debug_info.unit_infos()[unit];
        let mut entries = unit_info.unit.entries();
        while let Ok(Some((_, entry))) = entries.next_dfs() {
            if entry.attr(gimli::DW_AT_low_pc).ok().flatten().is_some() {
                return crate::GimliDie::new(debug_info, unit_info, entry.offset());
            }
        }
        panic!("No DIE with a low_pc");
    }

    /// A unit whose line program has `source_file` and `header` in `working_dir`.
    fn unit_with_files(working_dir: &str, source_file: &str, header: &str) -> (Unit, FileId) {
        let encoding = gimli::Encoding {
            format: gimli::Format::Dwarf32,
            version: 5,
            address_size: 8,
        };
        let mut line_program = LineProgram::new(
            encoding,
            gimli::LineEncoding::default(),
            LineString::String(working_dir.into()),
            None,
            LineString::String(source_file.into()),
            None,
        );
        let directory = line_program.default_directory();
        line_program.add_file(LineString::String(source_file.into()), directory, None);
        let header = line_program.add_file(LineString::String(header.into()), directory, None);

        let mut unit = Unit::new(encoding, line_program);
        let root = unit.root();
        let entry = unit.get_mut(root);
        entry.set(
            gimli::DW_AT_name,
            AttributeValue::String(source_file.into()),
        );
        entry.set(
            gimli::DW_AT_comp_dir,
            AttributeValue::String(working_dir.into()),
        );
        (unit, header)
    }

    #[test]
    fn inherited_attributes_keep_the_unit_they_were_read_from() {
        let mut dwarf = gimli::write::Dwarf::new();

        let (mut widget_unit, widget_header) =
            unit_with_files("/work/widget", "widget.cpp", "widget.h");
        let root = widget_unit.root();
        let int = widget_unit.add(root, gimli::DW_TAG_base_type);
        widget_unit
            .get_mut(int)
            .set(gimli::DW_AT_name, AttributeValue::String("int".into()));
        let declaration = widget_unit.add(root, gimli::DW_TAG_subprogram);
        let entry = widget_unit.get_mut(declaration);
        entry.set(gimli::DW_AT_name, AttributeValue::String("count".into()));
        entry.set(gimli::DW_AT_declaration, AttributeValue::Flag(true));
        entry.set(
            gimli::DW_AT_decl_file,
            AttributeValue::FileIndex(Some(widget_header)),
        );
        entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(int));
        let widget = dwarf.units.add(widget_unit);

        // Same shape, so a lookup in the wrong unit finds `float` and `main.h` instead.
        let (mut main_unit, main_header) = unit_with_files("/work/app", "main.cpp", "main.h");
        let root = main_unit.root();
        let float = main_unit.add(root, gimli::DW_TAG_base_type);
        main_unit
            .get_mut(float)
            .set(gimli::DW_AT_name, AttributeValue::String("float".into()));
        let ratio = main_unit.add(root, gimli::DW_TAG_variable);
        let entry = main_unit.get_mut(ratio);
        entry.set(gimli::DW_AT_name, AttributeValue::String("ratio".into()));
        entry.set(gimli::DW_AT_type, AttributeValue::UnitRef(float));
        entry.set(
            gimli::DW_AT_decl_file,
            AttributeValue::FileIndex(Some(main_header)),
        );
        let definition = main_unit.add(root, gimli::DW_TAG_subprogram);
        let entry = main_unit.get_mut(definition);
        entry.set(
            gimli::DW_AT_specification,
            AttributeValue::DebugInfoRef(Reference::Entry(widget, declaration)),
        );
        entry.set(gimli::DW_AT_low_pc, AttributeValue::Udata(0x1000));
        dwarf.units.add(main_unit);

        let debug_info = load_debug_info_units(&mut dwarf);
        assert_eq!(debug_info.unit_infos().len(), 2);
        let count = first_with_low_pc(&debug_info, 1);

        let ratio = debug_info
            .find_die(gimli::DW_TAG_variable, "ratio")
            .expect("ratio is defined");
        assert_eq!(
            ParsedAttributes::normalize(&ratio).declaration.file,
            Some(TypedPath::derive("/work/app/main.h").to_path_buf())
        );

        let parsed = ParsedAttributes::normalize(&count);
        assert_eq!(parsed.name, "count");
        assert_eq!(
            parsed.declaration.file,
            Some(TypedPath::derive("/work/widget/widget.h").to_path_buf())
        );
        assert_eq!(
            parsed
                .type_ref
                .as_ref()
                .and_then(|type_ref| type_ref.resolve(&count))
                .and_then(|type_die| type_die.name()),
            Some("int".to_string())
        );
        assert_eq!(
            parsed
                .specification
                .as_ref()
                .and_then(|specification| specification.resolve(&count))
                .map(|specification| specification.unit_info().offset()),
            Some(debug_info.unit_infos()[0].offset())
        );
    }

    #[test]
    fn abstract_origin_cycles_are_bounded() {
        let mut dwarf = new_dwarf_unit(8);
        let root = dwarf.unit.root();
        let first = dwarf.unit.add(root, gimli::DW_TAG_variable);
        let second = dwarf.unit.add(root, gimli::DW_TAG_variable);
        name(&mut dwarf, first, "first");
        dwarf
            .unit
            .get_mut(first)
            .set(gimli::DW_AT_abstract_origin, AttributeValue::UnitRef(second));
        dwarf
            .unit
            .get_mut(second)
            .set(gimli::DW_AT_abstract_origin, AttributeValue::UnitRef(first));

        let debug_info = load_debug_info(&mut dwarf);
        let die = debug_info
            .find_die(gimli::DW_TAG_variable, "first")
            .unwrap();

        let names = die
            .attributes()
            .into_iter()
            .filter(|attribute| attribute.name == gimli::DW_AT_name)
            .count();
        // `first` contributes its name at every even depth of the chain.
        assert_eq!(names, MAX_INHERITANCE_DEPTH / 2 + 1);
    }

    #[test]
    fn unresolvable_references() {
        let mut dwarf = new_dwarf_unit(8);
        let root = dwarf.unit.root();
        let variable = dwarf.unit.add(root, gimli::DW_TAG_variable);
        name(&mut dwarf, variable, "orphan");

        let debug_info = load_debug_info(&mut dwarf);
        let die = debug_info
            .find_die(gimli::DW_TAG_variable, "orphan")
            .unwrap();

        let dangling = crate::FormValue::new(
            gimli::AttributeValue::UnitRef(gimli::UnitOffset(0xffff)),
            die.unit_info().offset(),
        );
        assert!(die.resolve_reference(&dangling).is_none());

        let unknown_signature = crate::FormValue::new(
            gimli::AttributeValue::DebugTypesRef(gimli::DebugTypeSignature(0x1234)),
            die.unit_info().offset(),
        );
        assert!(die.resolve_reference(&unknown_signature).is_none());
    }
}
