use serde::Serialize;

/// The access level of a declaration, e.g. a member of a class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AccessLevel {
    /// No accessibility was specified.
    #[default]
    None,
    /// `DW_ACCESS_public`
    Public,
    /// `DW_ACCESS_private`
    Private,
    /// `DW_ACCESS_protected`
    Protected,
}

impl From<gimli::DwAccess> for AccessLevel {
    fn from(access: gimli::DwAccess) -> Self {
        match access {
            gimli::DW_ACCESS_public => AccessLevel::Public,
            gimli::DW_ACCESS_private => AccessLevel::Private,
            gimli::DW_ACCESS_protected => AccessLevel::Protected,
            _ => AccessLevel::None,
        }
    }
}

/// Map the raw value of a `DW_AT_accessibility` attribute to an [`AccessLevel`].
///
/// Values which are not one of the `DW_ACCESS_*` codes map to [`AccessLevel::None`].
pub fn map_accessibility(raw_value: u64) -> AccessLevel {
    match u8::try_from(raw_value) {
        Ok(access) => AccessLevel::from(gimli::DwAccess(access)),
        Err(_) => AccessLevel::None,
    }
}
