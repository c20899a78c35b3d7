use serde::Serialize;

use crate::{
    die_node::{DieNode, FormValue},
    execution_context::{value_as_unsigned, ExecutionContext},
};

/// The dimensions of an array type.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayInfo {
    /// The number of elements of each dimension, outermost dimension first.
    ///
    /// A count of `0` means that the size of the dimension is not known. An array that was
    /// explicitly declared with `DW_AT_count` of `0` is reported the same way.
    pub element_orders: Vec<u64>,
    /// `DW_AT_bit_stride` of the last subrange that specified one.
    pub bit_stride: Option<u64>,
    /// `DW_AT_byte_stride` of the last subrange that specified one.
    pub byte_stride: Option<u64>,
}

/// Resolve the dimensions of the array described by `array_die`.
///
/// Every `DW_TAG_subrange_type` child of the DIE contributes one dimension. The element count of a
/// dimension is taken from `DW_AT_count`, or computed from `DW_AT_lower_bound` and
/// `DW_AT_upper_bound`. If `DW_AT_count` refers to a variable, the variable is evaluated in the
/// current frame of `exe_ctx`.
///
/// Returns `None` only if `array_die` is not a valid DIE.
pub fn resolve_array_bounds<N: DieNode>(
    array_die: &N,
    exe_ctx: Option<&dyn ExecutionContext>,
) -> Option<ArrayInfo> {
    if !array_die.is_valid() {
        return None;
    }

    let mut array_info = ArrayInfo::default();

    for child in array_die.children() {
        if child.tag() != gimli::DW_TAG_subrange_type {
            tracing::trace!(
                "Ignoring unexpected child tag {} while extracting array range",
                child.tag()
            );
            continue;
        }

        let attributes = child.attributes();
        if attributes.is_empty() {
            continue;
        }

        let mut num_elements = 0;
        let mut lower_bound = 0;
        let mut upper_bound = 0;
        let mut upper_bound_valid = false;

        for attribute in &attributes {
            let value = &attribute.value;
            match attribute.name {
                gimli::DW_AT_count => {
                    if value.is_reference() {
                        if let Some(count) = evaluate_count_reference(&child, value, exe_ctx) {
                            num_elements = count;
                        }
                    } else {
                        num_elements = value.unsigned().unwrap_or_default();
                    }
                }
                gimli::DW_AT_bit_stride => {
                    array_info.bit_stride = Some(value.unsigned().unwrap_or_default());
                }
                gimli::DW_AT_byte_stride => {
                    array_info.byte_stride = Some(value.unsigned().unwrap_or_default());
                }
                gimli::DW_AT_lower_bound => {
                    lower_bound = value.unsigned().unwrap_or_default();
                }
                gimli::DW_AT_upper_bound => {
                    upper_bound_valid = true;
                    upper_bound = value.unsigned().unwrap_or_default();
                }
                _ => {}
            }
        }

        if num_elements == 0 && upper_bound_valid && upper_bound >= lower_bound {
            // A full `0..=u64::MAX` range wraps to 0, which reads as unknown.
            num_elements = upper_bound.wrapping_sub(lower_bound).wrapping_add(1);
        }

        array_info.element_orders.push(num_elements);
    }

    Some(array_info)
}

/// Evaluate a `DW_AT_count` which refers to a variable, e.g. for C99 variable length arrays.
///
/// Returns `None` if there is no frame to evaluate in, the reference does not point at a
/// variable, or the evaluation fails.
fn evaluate_count_reference<N: DieNode>(
    subrange_die: &N,
    count: &FormValue,
    exe_ctx: Option<&dyn ExecutionContext>,
) -> Option<u64> {
    let variable_die = subrange_die.resolve_reference(count)?;
    if variable_die.tag() != gimli::DW_TAG_variable {
        tracing::debug!(
            "DW_AT_count refers to a {} instead of a variable",
            variable_die.tag()
        );
        return None;
    }

    let frame = exe_ctx?.current_frame()?;
    let name = variable_die.name()?;

    match frame.evaluate_variable(&name) {
        Ok(value) => value_as_unsigned(value),
        Err(error) => {
            tracing::debug!("Unable to evaluate `{name}` for DW_AT_count: {error}");
            None
        }
    }
}
