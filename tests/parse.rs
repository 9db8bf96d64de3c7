use regspill::debug_utils::{DisplayFunction, validate_ssa};
use regspill::function::{Block, Function, Opcode, RegClass, Value, ValueFlags, ValueType};

const TEXT: &str = "\
%0 = frame
block0 freq(1):
    %1:class0 = const [remat]
    %2:class1 = add %1, %1 [modifies_flags, cost(3)]
    %3 = branch %2
block1 freq(0.5) preds(block0):
    %4:mem = spill %0, %2
    %5 = jump
block2 freq(1.5) preds(block0, block1):
    %6:class0 = phi %1, %1
    %7 = ret %6
    %8 = keep %2
";

#[test]
fn display_round_trip() {
    let func = Function::parse(TEXT).unwrap();
    validate_ssa(&func).unwrap();
    assert_eq!(func.to_string(), TEXT);
    assert_eq!(DisplayFunction(&func).to_string(), TEXT);

    let reparsed = Function::parse(&func.to_string()).unwrap();
    assert_eq!(reparsed.to_string(), TEXT);
}

#[test]
fn parsed_contents() {
    let func = Function::parse(TEXT).unwrap();
    let v = Value::new;
    let [b0, b1, b2] = [0, 1, 2].map(Block::new);

    assert_eq!(func.num_blocks(), 3);
    assert_eq!(func.block_frequency(b1), 0.5);
    assert_eq!(func.block_preds(b2), &[b0, b1]);
    assert_eq!(func.block_succs(b0), &[b1, b2]);

    assert_eq!(func.opcode(v(0)), Opcode::FramePointer);
    assert!(!func.is_scheduled(v(0)));
    assert_eq!(func.mnemonic(v(2)), Some("add"));
    assert_eq!(func.value_type(v(2)), ValueType::Reg(RegClass::new(1)));
    assert_eq!(func.value_flags(v(2)), ValueFlags::MODIFIES_FLAGS);
    assert_eq!(func.value_cost(v(2)), 3);
    assert_eq!(func.value_cost(v(1)), 1);
    assert_eq!(func.value_operands(v(2)), &[v(1), v(1)]);
    assert_eq!(func.value_users(v(1)).len(), 4);
    assert_eq!(func.opcode(v(4)), Opcode::Spill);
    assert_eq!(func.value_type(v(4)), ValueType::Memory);
    assert!(func.is_phi(v(6)));
    assert_eq!(func.block_insts(b2).collect::<Vec<_>>(), [v(6), v(7), v(8)]);
}

#[test]
fn forward_references() {
    let func = Function::parse(
        "
block0 freq(1):
    %0:class0 = init
    %1 = jump
block1 freq(10) preds(block0, block1):
    %2:class0 = phi %0, %3
    %3:class0 = inc %2
    %4 = branch %3
block2 freq(1) preds(block1):
    %5 = ret %3
",
    )
    .unwrap();
    validate_ssa(&func).unwrap();
    let v = Value::new;
    assert_eq!(func.value_operands(v(2)), &[v(0), v(3)]);
    assert_eq!(func.block_succs(Block::new(1)), &[Block::new(1), Block::new(2)]);
}

#[test]
fn parse_errors() {
    let cases = [
        ("block1 freq(1):\n    %0 = ret\n", "in order"),
        ("block0 freq(1):\n    %0 = ret %1\n", "not defined"),
        ("block0 freq(1):\n    %0 = x\n    %0 = ret\n", "multiple times"),
        ("block0 freq(1):\n    %0 = x\n    %1 = phi\n    %2 = ret\n", "phis must come first"),
        ("block0 freq(1):\n    %0 = frame\n    %1 = ret\n", "before all blocks"),
        ("%0 = x\nblock0 freq(1):\n    %1 = ret\n", "not inside a block"),
        ("block0 freq(1):\n    %0 = ret [remat, remat]\n", "duplicate attribute"),
        ("block0 freq(1):\n    %0 = jump [cost(2)]\n", "generic operations"),
        ("block0 freq(1) preds(block0):\n    %0 = ret\n", "entry block"),
        ("block0 freq(1):\n    %0 = ret\nblock1 freq(1) preds(block7):\n    %1 = ret\n", "undefined block"),
    ];
    for (text, message) in cases {
        let err = Function::parse(text).unwrap_err().to_string();
        assert!(err.contains(message), "{text:?}: {err}");
    }
}
