use alloc::format;
use alloc::vec::Vec;
use core::str::FromStr;

use anyhow::Result;
use hashbrown::HashMap;
use pest::error::{Error, ErrorVariant};
use pest::iterators::Pair;
use pest::{Parser, Span};
use pest_derive::Parser;
use rustc_hash::FxBuildHasher;

use crate::function::{Block, Function, InstDesc, Opcode, RegClass, Value, ValueFlags, ValueType};

#[derive(Parser)]
#[grammar = "debug_utils/grammar.pest"]
struct FunctionParser;

/// Helper function to extract N sub-pairs when the layout of a rule is fixed.
fn extract<const N: usize>(pair: Pair<'_, Rule>, expected_rules: [Rule; N]) -> [Pair<'_, Rule>; N] {
    let mut out = [(); N].map(|()| pair.clone());
    let mut i = 0;
    for pair in pair.into_inner() {
        assert_eq!(pair.as_rule(), expected_rules[i]);
        out[i] = pair;
        i += 1;
    }
    assert_eq!(i, N);
    out
}

/// Helper function to emit a custom error at the given span.
fn custom_error(span: Span<'_>, msg: &str) -> Error<Rule> {
    Error::new_from_span(
        ErrorVariant::<Rule>::CustomError {
            message: msg.into(),
        },
        span,
    )
}

fn parse_number<T: FromStr>(pair: Pair<'_, Rule>) -> Result<T> {
    Ok(pair
        .as_str()
        .parse()
        .map_err(|_| custom_error(pair.as_span(), "invalid number"))?)
}

/// Parses `block3`, `class1` or `%5` into its number.
fn parse_index(pair: Pair<'_, Rule>) -> Result<usize> {
    let [number] = extract(pair, [Rule::number]);
    parse_number(number)
}

/// An instruction whose operands can only be resolved once all values are
/// known.
struct PendingOperands<'i> {
    value: Value,
    operands: Vec<Pair<'i, Rule>>,
}

struct Context<'i> {
    func: Function,
    values: HashMap<usize, Value, FxBuildHasher>,
    preds: Vec<Vec<Pair<'i, Rule>>>,
    pending: Vec<PendingOperands<'i>>,
    current_block: Option<Block>,
}

impl<'i> Context<'i> {
    fn parse_block_label(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        let mut inner = pair.into_inner();
        let (Some(block), Some(frequency)) = (inner.next(), inner.next()) else {
            unreachable!();
        };
        let span = block.as_span();
        if parse_index(block)? != self.func.num_blocks() {
            Err(custom_error(span, "blocks must be declared in order and with no gaps"))?;
        }
        let [float] = extract(frequency, [Rule::float]);
        let frequency: f32 = parse_number(float)?;
        let block = self.func.add_block(frequency);
        self.current_block = Some(block);

        let mut preds = Vec::new();
        if let Some(pair) = inner.next() {
            let [list] = extract(pair, [Rule::block_list]);
            preds.extend(list.into_inner());
        }
        self.preds.push(preds);
        Ok(())
    }

    fn parse_instruction(&mut self, pair: Pair<'i, Rule>) -> Result<()> {
        let span = pair.as_span();
        let mut label = None;
        let mut ty = ValueType::None;
        let mut name = "";
        let mut operands = Vec::new();
        let mut flags = ValueFlags::empty();
        let mut cost = None;
        for pair in pair.into_inner() {
            match pair.as_rule() {
                Rule::result => {
                    for pair in pair.into_inner() {
                        match pair.as_rule() {
                            Rule::value => label = Some(pair),
                            Rule::value_type => ty = parse_value_type(pair)?,
                            _ => unreachable!(),
                        }
                    }
                }
                Rule::mnemonic => name = pair.as_str(),
                Rule::value_list => operands.extend(pair.into_inner()),
                Rule::attributes => {
                    for attr in pair.into_inner() {
                        let attr_span = attr.as_span();
                        let Some(attr) = attr.into_inner().next() else {
                            unreachable!();
                        };
                        match attr.as_rule() {
                            Rule::cost => {
                                if cost.is_some() {
                                    Err(custom_error(attr_span, "duplicate attribute"))?;
                                }
                                let [number] = extract(attr, [Rule::number]);
                                cost = Some(parse_number(number)?);
                            }
                            Rule::flag => {
                                let flag = match attr.as_str() {
                                    "remat" => ValueFlags::REMATERIALIZABLE,
                                    "modifies_flags" => ValueFlags::MODIFIES_FLAGS,
                                    "dont_spill" => ValueFlags::DONT_SPILL,
                                    "ignore" => ValueFlags::IGNORE,
                                    "remat_clone" => ValueFlags::REMAT_CLONE,
                                    _ => unreachable!(),
                                };
                                if flags.contains(flag) {
                                    Err(custom_error(attr_span, "duplicate attribute"))?;
                                }
                                flags |= flag;
                            }
                            _ => unreachable!(),
                        }
                    }
                }
                _ => unreachable!(),
            }
        }

        let opcode = match name {
            "phi" => Opcode::Phi,
            "spill" => Opcode::Spill,
            "reload" => Opcode::Reload,
            "keep" => Opcode::Keep,
            "jump" => Opcode::Jump,
            "branch" => Opcode::Branch,
            "ret" => Opcode::Return,
            "frame" => Opcode::FramePointer,
            "nomem" => Opcode::NoMem,
            "unknown" => Opcode::Unknown,
            _ => Opcode::Inst,
        };
        if cost.is_some() && opcode != Opcode::Inst {
            Err(custom_error(span, "cost can only be given for generic operations"))?;
        }

        let value = match (opcode.is_unscheduled(), self.current_block) {
            (true, None) => {
                if !operands.is_empty() {
                    Err(custom_error(span, "special values don't have operands"))?;
                }
                match opcode {
                    Opcode::FramePointer => self.func.frame_pointer(),
                    Opcode::NoMem => self.func.no_mem(),
                    _ => self.func.unknown(),
                }
            }
            (true, Some(_)) => {
                Err(custom_error(span, "special values must be declared before all blocks"))?
            }
            (false, None) => Err(custom_error(span, "instruction is not inside a block"))?,
            (false, Some(block)) => {
                if opcode == Opcode::Phi {
                    if let Some(last) = self.func.sched_last(block) {
                        if !self.func.is_phi(last) {
                            Err(custom_error(span, "phis must come first in a block"))?;
                        }
                    }
                }
                let value = if opcode == Opcode::Inst {
                    let desc = InstDesc::new(name).ty(ty).cost(cost.unwrap_or(1));
                    self.func.append_inst(block, desc)
                } else {
                    self.func.append_op(block, opcode, ty, &[])
                };
                self.func.add_flags(value, flags);
                value
            }
        };

        if let Some(label) = label {
            let label_span = label.as_span();
            let index = parse_index(label)?;
            if self.values.insert(index, value).is_some() {
                Err(custom_error(label_span, "value defined multiple times"))?;
            }
        }
        if !operands.is_empty() {
            self.pending.push(PendingOperands { value, operands });
        }
        Ok(())
    }

    fn resolve_value(&self, pair: Pair<'i, Rule>) -> Result<Value> {
        let span = pair.as_span();
        let index = parse_index(pair)?;
        match self.values.get(&index) {
            Some(&value) => Ok(value),
            None => Err(custom_error(span, &format!("%{index} is not defined")))?,
        }
    }

    fn finish(mut self) -> Result<Function> {
        let preds = core::mem::take(&mut self.preds);
        for (index, preds) in preds.into_iter().enumerate() {
            let block = Block::new(index);
            for pair in preds {
                let span = pair.as_span();
                let pred = parse_index(pair)?;
                if pred >= self.func.num_blocks() {
                    Err(custom_error(span, "undefined block"))?;
                }
                if block == Block::ENTRY_BLOCK {
                    Err(custom_error(span, "the entry block can't have predecessors"))?;
                }
                self.func.add_edge(Block::new(pred), block);
            }
        }

        let pending = core::mem::take(&mut self.pending);
        for PendingOperands { value, operands } in pending {
            let operands = operands
                .into_iter()
                .map(|pair| self.resolve_value(pair))
                .collect::<Result<Vec<_>>>()?;
            self.func.set_operands(value, &operands);
        }
        Ok(self.func)
    }
}

fn parse_value_type(pair: Pair<'_, Rule>) -> Result<ValueType> {
    let Some(pair) = pair.into_inner().next() else {
        unreachable!();
    };
    Ok(match pair.as_rule() {
        Rule::regclass => ValueType::Reg(RegClass::new(parse_index(pair)?)),
        Rule::memory => ValueType::Memory,
        _ => unreachable!(),
    })
}

impl Function {
    /// Parses a textual representation of a [`Function`].
    ///
    /// The text format is the one produced by [`DisplayFunction`]:
    ///
    /// ```text
    /// %0 = frame
    /// block0 freq(1):
    ///     %1:class0 = const [remat]
    ///     %2:class0 = add %1, %1 [cost(2)]
    ///     %3 = branch %2
    /// block1 freq(0.5) preds(block0):
    ///     %4 = jump
    /// block2 freq(1) preds(block0, block1):
    ///     %5 = ret %2
    /// ```
    ///
    /// Values may be referenced before they are defined. Control-flow edges
    /// are given by the predecessor list of each block, in phi operand order.
    ///
    /// [`DisplayFunction`]: crate::debug_utils::DisplayFunction
    pub fn parse(input: &str) -> Result<Self> {
        let parse_result = FunctionParser::parse(Rule::function, input)?;

        let mut ctx = Context {
            func: Function::new(),
            values: HashMap::default(),
            preds: Vec::new(),
            pending: Vec::new(),
            current_block: None,
        };
        for pair in parse_result {
            match pair.as_rule() {
                Rule::block_label => ctx.parse_block_label(pair)?,
                Rule::instruction => ctx.parse_instruction(pair)?,
                Rule::EOI => {}
                _ => unreachable!(),
            }
        }
        ctx.finish()
    }
}
