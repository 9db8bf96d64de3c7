//! Support for displaying a human-readable representation of a [`Function`].

use core::cell::Cell;
use core::fmt;

use crate::function::{Function, Opcode, Value, ValueFlags, ValueType};

/// Helper type to display a separated list of displayable values.
pub(crate) struct DisplayIter<T> {
    iter: Cell<Option<T>>,
    separator: &'static str,
}

impl<T: IntoIterator> fmt::Display for DisplayIter<T>
where
    T::Item: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(iter) = self.iter.take() else {
            return Ok(());
        };
        for (i, val) in iter.into_iter().enumerate() {
            if i == 0 {
                write!(f, "{val}")?;
            } else {
                write!(f, "{} {val}", self.separator)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn display_iter<I: IntoIterator<Item = impl fmt::Display>>(
    iter: I,
    separator: &'static str,
) -> DisplayIter<I> {
    DisplayIter {
        iter: Cell::new(Some(iter)),
        separator,
    }
}

/// Wrapper around a [`Function`] that provides a [`Display`] implementation
/// which dumps the function in a format that is both human-readable and
/// machine-parseable.
///
/// The output can be parsed back with [`Function::parse`] (requires the
/// `parse` cargo feature). Value numbers are not preserved by a round trip.
///
/// [`Function::parse`]: crate::function::Function::parse
/// [`Display`]: core::fmt::Display
pub struct DisplayFunction<'a>(pub &'a Function);

impl fmt::Debug for DisplayFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DisplayFunction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.0;

        // Special values which live outside any block.
        for value in func.values() {
            if func.opcode(value).is_unscheduled() {
                writeln!(f, "{value} = {}", func.opcode(value).name())?;
            }
        }

        for block in func.blocks() {
            write!(f, "{block} freq({})", func.block_frequency(block))?;
            if !func.block_preds(block).is_empty() {
                write!(f, " preds({})", display_iter(func.block_preds(block), ","))?;
            }
            writeln!(f, ":")?;
            for value in func.block_insts(block) {
                f.write_str("    ")?;
                display_value(f, func, value)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

fn display_value(f: &mut fmt::Formatter<'_>, func: &Function, value: Value) -> fmt::Result {
    match func.value_type(value) {
        ValueType::None => write!(f, "{value} = ")?,
        ty => write!(f, "{value}:{ty} = ")?,
    }
    match func.opcode(value) {
        Opcode::Inst => f.write_str(func.mnemonic(value).unwrap_or("inst"))?,
        opcode => f.write_str(opcode.name())?,
    }
    if !func.value_operands(value).is_empty() {
        write!(f, " {}", display_iter(func.value_operands(value), ","))?;
    }

    const FLAG_NAMES: [(ValueFlags, &str); 5] = [
        (ValueFlags::REMATERIALIZABLE, "remat"),
        (ValueFlags::MODIFIES_FLAGS, "modifies_flags"),
        (ValueFlags::DONT_SPILL, "dont_spill"),
        (ValueFlags::IGNORE, "ignore"),
        (ValueFlags::REMAT_CLONE, "remat_clone"),
    ];
    let flags = func.value_flags(value);
    let cost = func.value_cost(value);
    let mut sep = " [";
    for (flag, name) in FLAG_NAMES {
        if flags.contains(flag) {
            write!(f, "{sep}{name}")?;
            sep = ", ";
        }
    }
    if cost != 1 && func.opcode(value) == Opcode::Inst {
        write!(f, "{sep}cost({cost})")?;
        sep = ", ";
    }
    if sep == ", " {
        f.write_str("]")?;
    }
    Ok(())
}
