use std::collections::BTreeMap;

use gimli::{Endianity, EvaluationResult, UnitOffset};

use crate::{
    debug_info::{DebugInfo, GimliDie},
    die_node::{DieNode, FormValue},
    execution_context::{ExecutionContext, StackFrameContext},
    unit_info::UnitInfo,
    DebugError, GimliReader, ParsedAttributes,
};

/// How many typedef, `const`, `volatile` and `restrict` wrappers are looked through to find the
/// type of a variable.
pub const MAX_TYPE_MODIFIER_DEPTH: usize = 16;

/// Read access to the memory of the target.
pub trait MemoryReader {
    /// Fill `data` with the bytes starting at `address`.
    fn read(&self, address: u64, data: &mut [u8]) -> Result<(), DebugError>;
}

/// The register state of a stack frame, as determined by unwinding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFrameInfo {
    /// The program counter of the frame.
    pub pc: u64,
    /// The value of `DW_AT_frame_base` of the function, if known.
    pub frame_base: Option<u64>,
    /// The canonical frame address, if known.
    pub canonical_frame_address: Option<u64>,
    /// Register values, keyed by DWARF register number.
    pub registers: BTreeMap<u16, u64>,
}

/// A halted stack frame in which variables are evaluated from their DWARF locations.
pub struct DwarfStackFrame<'debug_info> {
    debug_info: &'debug_info DebugInfo,
    memory: &'debug_info dyn MemoryReader,
    frame_info: StackFrameInfo,
}

/// How a scalar value is laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalarType {
    byte_size: u64,
    encoding: ScalarEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarEncoding {
    Signed,
    Unsigned,
    Float,
}

impl<'debug_info> DwarfStackFrame<'debug_info> {
    /// Create a frame from the unwound register state.
    pub fn new(
        debug_info: &'debug_info DebugInfo,
        memory: &'debug_info dyn MemoryReader,
        frame_info: StackFrameInfo,
    ) -> Self {
        Self {
            debug_info,
            memory,
            frame_info,
        }
    }

    /// The register state of this frame.
    pub fn frame_info(&self) -> &StackFrameInfo {
        &self.frame_info
    }

    /// Find the variable with the given name that is visible at the program counter.
    ///
    /// Variables of the function containing the program counter shadow global variables.
    fn find_variable(&self, name: &str) -> Result<GimliDie<'debug_info>, DebugError> {
        let dwarf = &self.debug_info.dwarf;

        for unit_info in self.debug_info.unit_infos() {
            let Some(function) = unit_info.function_containing(dwarf, self.frame_info.pc)? else {
                continue;
            };
            if let Some(variable) = self.find_local(unit_info, function, name)? {
                return Ok(variable);
            }
        }

        for unit_info in self.debug_info.unit_infos() {
            if let Some(variable) = self.find_global(unit_info, name)? {
                return Ok(variable);
            }
        }

        Err(DebugError::UnknownVariable(name.to_string()))
    }

    /// The innermost variable or parameter named `name` in the scopes of `function` that contain
    /// the program counter.
    fn find_local(
        &self,
        unit_info: &'debug_info UnitInfo,
        function: UnitOffset,
        name: &str,
    ) -> Result<Option<GimliDie<'debug_info>>, DebugError> {
        let dwarf = &self.debug_info.dwarf;
        let mut cursor = unit_info.unit.entries_at_offset(function)?;

        let mut depth: isize = 0;
        // Whether the scope at each depth contains the program counter.
        let mut active_scopes: Vec<bool> = vec![];
        let mut found: Option<(isize, UnitOffset)> = None;

        while let Some((delta, entry)) = cursor.next_dfs()? {
            depth += delta;
            if depth <= 0 && !active_scopes.is_empty() {
                break;
            }
            active_scopes.truncate(depth as usize);

            let in_scope = active_scopes.iter().all(|active| *active);
            let tag = entry.tag();

            if in_scope
                && matches!(tag, gimli::DW_TAG_variable | gimli::DW_TAG_formal_parameter)
                && found.map_or(true, |(found_depth, _)| depth > found_depth)
            {
                let die = GimliDie::new(self.debug_info, unit_info, entry.offset());
                if die.name().as_deref() == Some(name) {
                    found = Some((depth, entry.offset()));
                }
            }

            let active = match tag {
                gimli::DW_TAG_lexical_block | gimli::DW_TAG_inlined_subroutine => {
                    let mut ranges = dwarf.die_ranges(&unit_info.unit, entry)?;
                    let mut has_ranges = false;
                    let mut contains_pc = false;
                    while let Some(range) = ranges.next()? {
                        has_ranges = true;
                        if range.begin <= self.frame_info.pc && self.frame_info.pc < range.end {
                            contains_pc = true;
                            break;
                        }
                    }
                    contains_pc || !has_ranges
                }
                _ => true,
            };
            active_scopes.push(active);
        }

        Ok(found.map(|(_, offset)| GimliDie::new(self.debug_info, unit_info, offset)))
    }

    /// A variable named `name` that is not nested in a function.
    fn find_global(
        &self,
        unit_info: &'debug_info UnitInfo,
        name: &str,
    ) -> Result<Option<GimliDie<'debug_info>>, DebugError> {
        let mut cursor = unit_info.unit.entries();

        let mut depth: isize = 0;
        let mut scopes: Vec<gimli::DwTag> = vec![];

        while let Some((delta, entry)) = cursor.next_dfs()? {
            depth += delta;
            scopes.truncate(depth.max(0) as usize);

            let global_scope = scopes.iter().all(|tag| {
                matches!(
                    *tag,
                    gimli::DW_TAG_compile_unit
                        | gimli::DW_TAG_partial_unit
                        | gimli::DW_TAG_namespace
                )
            });

            if global_scope && entry.tag() == gimli::DW_TAG_variable {
                let die = GimliDie::new(self.debug_info, unit_info, entry.offset());
                if die.name().as_deref() == Some(name) {
                    return Ok(Some(die));
                }
            }

            scopes.push(entry.tag());
        }

        Ok(None)
    }

    fn evaluate(&self, variable: &GimliDie<'debug_info>) -> Result<gimli::Value, DebugError> {
        let mut const_value = None;
        let mut location = None;
        for attribute in variable.attributes() {
            match attribute.name {
                gimli::DW_AT_const_value => const_value = Some(attribute.value),
                gimli::DW_AT_location => location = Some(attribute.value),
                _ => {}
            }
        }

        if let Some(const_value) = const_value {
            let raw = const_value.unsigned().ok_or(DebugError::NotImplemented(
                "Constant values which are not integers",
            ))?;
            return Ok(match self.scalar_type(variable) {
                Ok(scalar_type) => scalar_type.value_from_bits(raw),
                Err(_) => gimli::Value::Generic(raw),
            });
        }

        let Some(location) = location else {
            return Err(DebugError::WarnAndContinue {
                message: "The variable has no location, it may have been optimized out."
                    .to_string(),
            });
        };

        let unit_info = self
            .debug_info
            .unit_info(location.unit)
            .unwrap_or(variable.unit_info());
        let expression = self.location_expression(unit_info, &location)?;
        let pieces = self.expression_to_piece(unit_info, expression)?;

        let piece = match pieces.as_slice() {
            [] => {
                return Err(DebugError::WarnAndContinue {
                    message: "The location of the variable is empty.".to_string(),
                })
            }
            [piece] => piece,
            _ => {
                return Err(DebugError::NotImplemented(
                    "Variables which are split into multiple pieces",
                ))
            }
        };

        match piece.location {
            gimli::Location::Empty => Err(DebugError::WarnAndContinue {
                message: "The value of this variable has been optimized out.".to_string(),
            }),
            gimli::Location::Address { address: 0 } => Err(DebugError::WarnAndContinue {
                message: "The value of this variable may have been optimized out of the debug info, by the compiler.".to_string(),
            }),
            gimli::Location::Address { address } => {
                let scalar_type = self.scalar_type(variable)?;
                self.read_scalar(address, scalar_type)
            }
            gimli::Location::Register { register } => self
                .frame_info
                .registers
                .get(&register.0)
                .map(|value| gimli::Value::Generic(*value))
                .ok_or_else(|| DebugError::WarnAndContinue {
                    message: format!("Error: Cannot resolve register: {register:?}"),
                }),
            gimli::Location::Value { value } => Ok(value),
            ref other => Err(DebugError::WarnAndContinue {
                message: format!(
                    "Unimplemented: variables with a location of type {:.100}",
                    format!("{other:?}")
                ),
            }),
        }
    }

    /// The expression describing the location at the program counter.
    fn location_expression(
        &self,
        unit_info: &UnitInfo,
        location: &FormValue,
    ) -> Result<gimli::Expression<GimliReader>, DebugError> {
        let value = match &location.value {
            gimli::AttributeValue::Exprloc(expression) => return Ok(expression.clone()),
            gimli::AttributeValue::Block(data) => return Ok(gimli::Expression(data.clone())),
            gimli::AttributeValue::SecOffset(offset) => {
                gimli::AttributeValue::LocationListsRef(gimli::LocationListsOffset(*offset))
            }
            other => other.clone(),
        };

        let Some(mut locations) = self
            .debug_info
            .dwarf
            .attr_locations(&unit_info.unit, value)?
        else {
            return Err(DebugError::WarnAndContinue {
                message: format!(
                    "Unimplemented: Could not extract location from: {:.100}",
                    format!("{:?}", location.value)
                ),
            });
        };

        while let Some(entry) = locations.next()? {
            if entry.range.begin <= self.frame_info.pc && self.frame_info.pc < entry.range.end {
                return Ok(entry.data);
            }
        }

        Err(DebugError::WarnAndContinue {
            message: format!(
                "The variable is not available at {:#010x}.",
                self.frame_info.pc
            ),
        })
    }

    /// Tries to get the result of a DWARF expression in the form of a Piece.
    fn expression_to_piece(
        &self,
        unit_info: &UnitInfo,
        expression: gimli::Expression<GimliReader>,
    ) -> Result<Vec<gimli::Piece<GimliReader, usize>>, DebugError> {
        let mut evaluation = expression.evaluation(unit_info.unit.encoding());
        let mut result = evaluation.evaluate()?;

        loop {
            result = match result {
                EvaluationResult::Complete => return Ok(evaluation.result()),
                EvaluationResult::RequiresMemory {
                    address,
                    size,
                    base_type,
                    ..
                } => self.provide_memory(address, size, base_type, &mut evaluation)?,
                EvaluationResult::RequiresFrameBase => {
                    provide_frame_base(self.frame_info.frame_base, &mut evaluation)?
                }
                EvaluationResult::RequiresRegister {
                    register,
                    base_type,
                } => provide_register(
                    &self.frame_info.registers,
                    register,
                    base_type,
                    &mut evaluation,
                )?,
                EvaluationResult::RequiresRelocatedAddress(address_index) => {
                    // The address_index as an offset from 0, so just pass it into the next step.
                    evaluation.resume_with_relocated_address(address_index)?
                }
                EvaluationResult::RequiresCallFrameCfa => {
                    provide_cfa(self.frame_info.canonical_frame_address, &mut evaluation)?
                }
                unimplemented_expression => {
                    return Err(DebugError::WarnAndContinue {
                        message: format!(
                            "Unimplemented: Expressions that include {unimplemented_expression:?} are not currently supported."
                        ),
                    });
                }
            }
        }
    }

    /// Reads memory requested by the DWARF resolver.
    fn provide_memory(
        &self,
        address: u64,
        size: u8,
        base_type: UnitOffset,
        evaluation: &mut gimli::Evaluation<GimliReader>,
    ) -> Result<EvaluationResult<GimliReader>, DebugError> {
        if base_type != UnitOffset(0) {
            return Err(DebugError::WarnAndContinue {
                message: format!(
                    "Unimplemented: Support for type {base_type:?} in `RequiresMemory`"
                ),
            });
        }

        let value = self.read_unsigned(address, size as u64)?;
        Ok(evaluation.resume_with_memory(gimli::Value::Generic(value))?)
    }

    /// The type of `variable`, after looking through typedefs and type qualifiers.
    fn scalar_type(&self, variable: &GimliDie<'debug_info>) -> Result<ScalarType, DebugError> {
        let mut current = *variable;
        for _ in 0..=MAX_TYPE_MODIFIER_DEPTH {
            let parsed = ParsedAttributes::normalize(&current);
            let Some(type_die) = parsed.type_ref.and_then(|type_ref| type_ref.resolve(&current))
            else {
                return Err(DebugError::WarnAndContinue {
                    message: "The type of the variable is not available.".to_string(),
                });
            };

            let type_attributes = ParsedAttributes::normalize(&type_die);
            let tag = type_die.tag();
            let scalar_type = match tag {
                gimli::DW_TAG_typedef
                | gimli::DW_TAG_const_type
                | gimli::DW_TAG_volatile_type
                | gimli::DW_TAG_restrict_type
                | gimli::DW_TAG_atomic_type => {
                    current = type_die;
                    continue;
                }
                gimli::DW_TAG_base_type => ScalarType {
                    byte_size: type_attributes.byte_size.unwrap_or_default(),
                    encoding: match type_attributes.encoding {
                        gimli::DW_ATE_signed | gimli::DW_ATE_signed_char => ScalarEncoding::Signed,
                        gimli::DW_ATE_float => ScalarEncoding::Float,
                        _ => ScalarEncoding::Unsigned,
                    },
                },
                gimli::DW_TAG_enumeration_type => ScalarType {
                    byte_size: type_attributes.byte_size.unwrap_or_default(),
                    encoding: ScalarEncoding::Unsigned,
                },
                gimli::DW_TAG_pointer_type
                | gimli::DW_TAG_reference_type
                | gimli::DW_TAG_rvalue_reference_type => ScalarType {
                    byte_size: type_attributes.byte_size.unwrap_or(
                        type_die.unit_info().unit.encoding().address_size as u64,
                    ),
                    encoding: ScalarEncoding::Unsigned,
                },
                other => {
                    return Err(DebugError::WarnAndContinue {
                        message: format!("Unimplemented: Evaluating variables of type {other}"),
                    });
                }
            };

            tracing::trace!("Variable has type {:?}", scalar_type);
            return Ok(scalar_type);
        }

        Err(DebugError::WarnAndContinue {
            message: format!(
                "The type of the variable is wrapped in more than {MAX_TYPE_MODIFIER_DEPTH} typedefs or qualifiers."
            ),
        })
    }

    fn read_scalar(&self, address: u64, scalar_type: ScalarType) -> Result<gimli::Value, DebugError> {
        let raw = self.read_unsigned(address, scalar_type.byte_size)?;
        Ok(scalar_type.value_from_bits(raw))
    }

    /// Read an unsigned integer of `size` bytes in the byte order of the target.
    fn read_unsigned(&self, address: u64, size: u64) -> Result<u64, DebugError> {
        let endianness = self.debug_info.endianness();
        let mut buff = [0u8; 8];
        let value = match size {
            1 => {
                self.read(address, &mut buff[..1])?;
                buff[0] as u64
            }
            2 => {
                self.read(address, &mut buff[..2])?;
                endianness.read_u16(&buff[..2]) as u64
            }
            4 => {
                self.read(address, &mut buff[..4])?;
                endianness.read_u32(&buff[..4]) as u64
            }
            8 => {
                self.read(address, &mut buff)?;
                endianness.read_u64(&buff)
            }
            x => {
                return Err(DebugError::WarnAndContinue {
                    message: format!(
                        "Unimplemented: Requested memory with size {x}, which is not supported yet."
                    ),
                });
            }
        };
        Ok(value)
    }

    fn read(&self, address: u64, data: &mut [u8]) -> Result<(), DebugError> {
        self.memory
            .read(address, data)
            .map_err(|error| DebugError::WarnAndContinue {
                message: format!(
                    "Failed to read {} bytes of target memory at {address:#010x}: {error}",
                    data.len()
                ),
            })
    }
}

impl ScalarType {
    /// Interpret the low `byte_size` bytes of `raw` according to the encoding.
    fn value_from_bits(self, raw: u64) -> gimli::Value {
        match (self.encoding, self.byte_size) {
            (ScalarEncoding::Signed, 1) => gimli::Value::I8(raw as i8),
            (ScalarEncoding::Signed, 2) => gimli::Value::I16(raw as i16),
            (ScalarEncoding::Signed, 4) => gimli::Value::I32(raw as i32),
            (ScalarEncoding::Signed, _) => gimli::Value::I64(raw as i64),
            (ScalarEncoding::Unsigned, 1) => gimli::Value::U8(raw as u8),
            (ScalarEncoding::Unsigned, 2) => gimli::Value::U16(raw as u16),
            (ScalarEncoding::Unsigned, 4) => gimli::Value::U32(raw as u32),
            (ScalarEncoding::Float, 4) => gimli::Value::F32(f32::from_bits(raw as u32)),
            (ScalarEncoding::Float, _) => gimli::Value::F64(f64::from_bits(raw)),
            (ScalarEncoding::Unsigned, _) => gimli::Value::U64(raw),
        }
    }
}

/// Returns `true` if `name` is a plain identifier, e.g. `len` or `_count1`.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

impl StackFrameContext for DwarfStackFrame<'_> {
    fn evaluate_variable(&self, name: &str) -> Result<gimli::Value, DebugError> {
        if !is_identifier(name) {
            return Err(DebugError::NotImplemented(
                "Evaluating expressions other than variable names",
            ));
        }

        let variable = self.find_variable(name)?;
        let value = self.evaluate(&variable)?;
        tracing::debug!("Evaluated `{}` at {:#010x}: {:?}", name, self.frame_info.pc, value);
        Ok(value)
    }
}

impl ExecutionContext for DwarfStackFrame<'_> {
    fn current_frame(&self) -> Option<&dyn StackFrameContext> {
        Some(self)
    }
}

/// Gets necessary register information for the DWARF resolver.
fn provide_register(
    stack_frame_registers: &BTreeMap<u16, u64>,
    register: gimli::Register,
    base_type: UnitOffset,
    evaluation: &mut gimli::Evaluation<GimliReader>,
) -> Result<EvaluationResult<GimliReader>, DebugError> {
    match stack_frame_registers.get(&register.0) {
        Some(raw_value) if base_type == UnitOffset(0) => {
            Ok(evaluation.resume_with_register(gimli::Value::Generic(*raw_value))?)
        }
        Some(_) => Err(DebugError::WarnAndContinue {
            message: format!(
                "Unimplemented: Support for type {:?} in `RequiresRegister`",
                base_type
            ),
        }),
        None => Err(DebugError::WarnAndContinue {
            message: format!(
                "Error while evaluating a variable location. No value for register #:{}.",
                register.0
            ),
        }),
    }
}

/// Gets necessary framebase information for the DWARF resolver.
fn provide_frame_base(
    frame_base: Option<u64>,
    evaluation: &mut gimli::Evaluation<GimliReader>,
) -> Result<EvaluationResult<GimliReader>, DebugError> {
    let Some(frame_base) = frame_base else {
        return Err(DebugError::WarnAndContinue {
            message: "Cannot evaluate a variable location without a valid frame base address."
                .to_string(),
        });
    };
    evaluation
        .resume_with_frame_base(frame_base)
        .map_err(|error| DebugError::WarnAndContinue {
            message: format!("Error while evaluating a variable location: {error}."),
        })
}

/// Gets necessary CFA information for the DWARF resolver.
fn provide_cfa(
    cfa: Option<u64>,
    evaluation: &mut gimli::Evaluation<GimliReader>,
) -> Result<EvaluationResult<GimliReader>, DebugError> {
    let Some(cfa) = cfa else {
        return Err(DebugError::WarnAndContinue {
            message: "Cannot evaluate a variable location without a valid canonical frame address."
                .to_string(),
        });
    };
    evaluation
        .resume_with_call_frame_cfa(cfa)
        .map_err(|error| DebugError::WarnAndContinue {
            message: format!("Error while evaluating a variable location: {error}."),
        })
}
