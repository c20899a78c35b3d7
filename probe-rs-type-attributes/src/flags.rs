use bitfield::bitfield;

bitfield! {
    /// Boolean properties of a DIE, collected while normalizing its attributes.
    ///
    /// A flag is only ever set while parsing, so the presence of an attribute with a false value
    /// does not clear a flag set by an earlier attribute.
    #[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct AttributeFlags(u16);
    impl Debug;
    /// `DW_AT_artificial`: the entry was generated by the compiler.
    pub is_artificial, set_artificial: 0;
    /// `DW_AT_explicit`: a member function declared `explicit`.
    pub is_explicit, set_explicit: 1;
    /// `DW_AT_declaration`: the entry is a forward declaration.
    pub is_forward_declaration, set_forward_declaration: 2;
    /// `DW_AT_inline`: the entry is an inlined symbol.
    pub is_inline, set_inline: 3;
    /// `DW_AT_enum_class`: a scoped enumeration.
    pub is_scoped_enum, set_scoped_enum: 4;
    /// `DW_AT_GNU_vector`: a vector type.
    pub is_vector, set_vector: 5;
    /// `DW_AT_virtuality`: a virtual member function or base class.
    pub is_virtual, set_virtual: 6;
    /// `DW_AT_external`: an externally visible symbol.
    pub is_external, set_external: 7;
    /// `DW_AT_export_symbols`: members are visible in the containing scope.
    pub is_exports_symbols, set_exports_symbols: 8;
    /// `DW_AT_APPLE_objc_direct`: an Objective-C direct method.
    pub is_objc_direct_call, set_objc_direct_call: 9;
    /// `DW_AT_APPLE_objc_complete_type`: the complete definition of an Objective-C type.
    pub is_objc_complete_type, set_objc_complete_type: 10;
}

impl AttributeFlags {
    /// Returns `true` if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}
