use regspill::arch::GenericArchInfo;
use regspill::debug_utils::{total_spill_costs, validate_ssa};
use regspill::function::{Block, Function, Opcode, RegClass, Value, ValueFlags, ValueType};
use regspill::spill::SpillEnv;
use regspill::{Options, SpillError, Stats};

const CLASS: RegClass = RegClass::new(0);

fn v(index: usize) -> Value {
    Value::new(index)
}

fn parse(text: &str) -> Function {
    let _ = pretty_env_logger::try_init();
    let func = Function::parse(text).unwrap();
    validate_ssa(&func).unwrap();
    func
}

fn run(
    func: &mut Function,
    arch: &GenericArchInfo,
    options: &Options,
    register: impl FnOnce(&mut SpillEnv<'_, GenericArchInfo>) -> Result<(), SpillError>,
) -> Stats {
    let mut env = SpillEnv::new(func, arch, options);
    register(&mut env).unwrap();
    let stats = env.insert_spills_reloads().unwrap();
    validate_ssa(func).unwrap();
    stats
}

const DIAMOND: &str = "
block0 freq(1):
    %0:class0 = def
    %1 = branch %0
block1 freq(0.5) preds(block0):
    %2 = clobber
    %3 = jump
block2 freq(0.5) preds(block0):
    %4 = clobber
    %5 = jump
block3 freq(1) preds(block1, block2):
    %6 = use %0
    %7 = ret
";

#[test]
fn dominated_spill_is_dropped() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    env.register_spill(v(0), v(0)).unwrap();
    env.register_spill(v(0), v(2)).unwrap();
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(0)]);
}

#[test]
fn dominating_spill_replaces_existing() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    env.register_spill(v(0), v(2)).unwrap();
    env.register_spill(v(0), v(4)).unwrap();
    env.register_spill(v(0), v(6)).unwrap();
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(2), v(4), v(6)]);

    env.register_spill(v(0), v(0)).unwrap();
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(0)]);
}

#[test]
fn spill_points_form_antichain() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    for after in [6, 2, 3, 2, 4, 5, 6] {
        env.register_spill(v(0), v(after)).unwrap();
    }
    let points: Vec<_> = env.spill_points(v(0)).collect();
    for &a in &points {
        for &b in &points {
            if a != b {
                assert!(!env.dominator_tree().value_dominates(env.function(), a, b));
            }
        }
    }
    assert_eq!(points.len(), 3);
}

#[test]
fn dominating_spill_added_for_uncovered_reload() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    env.register_spill(v(0), v(2)).unwrap();
    env.register_reload(v(0), v(3), CLASS, true).unwrap();
    env.ensure_dominating_spill(v(0));
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(2)]);

    env.register_reload(v(0), v(6), CLASS, true).unwrap();
    env.ensure_dominating_spill(v(0));
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(0)]);
}

#[test]
fn spill_cost_is_computed_once() {
    let mut func = parse(
        "
block0 freq(2):
    %0:class0 = def
    %1 = clobber
    %2 = ret %0
",
    );
    let arch = GenericArchInfo::new(5, 3);
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    assert_eq!(env.spill_cost(v(0)), 10.0);
    assert_eq!(env.spill_cost(v(0)), 10.0);
    assert_eq!(env.stats().spill_cost_computations(), 1);

    // Later requests don't change the settled cost.
    env.register_spill(v(0), v(1)).unwrap();
    assert_eq!(env.spill_cost(v(0)), 10.0);
    assert_eq!(env.stats().spill_cost_computations(), 1);
}

#[test]
fn late_spill_cheaper_than_definition() {
    let text = "
block0 freq(4):
    %0:class0 = def
    %1 = branch %0
block1 freq(1) preds(block0):
    %2 = clobber
    %3 = ret %0
block2 freq(3) preds(block0):
    %4 = ret
";
    let arch = GenericArchInfo::new(5, 3);

    let mut func = parse(text);
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());
    env.register_spill(v(0), v(2)).unwrap();
    assert_eq!(env.spill_cost(v(0)), 5.0);
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(2)]);

    let mut func = parse(text);
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());
    env.register_reload(v(0), v(3), CLASS, true).unwrap();
    assert_eq!(env.spill_cost(v(0)), 20.0);
    assert_eq!(env.spill_points(v(0)).collect::<Vec<_>>(), [v(0)]);
}

#[test]
fn remat_cost_limits() {
    let mut func = parse(
        "
%0 = frame
block0 freq(2):
    %1:class0 = a [remat]
    %2:class0 = b [remat]
    %3:class0 = add %1, %2 [remat]
    %4:class0 = addfp %1, %0 [remat]
    %5:class0 = slow [remat, cost(8)]
    %6:class0 = notremat
    %7:class0 = flags [remat, modifies_flags]
    %8:class0 = inc %1 [remat, cost(7)]
    %9 = ret %3, %4, %5, %6, %7, %8
",
    );
    let arch = GenericArchInfo::new(5, 3);
    let env = SpillEnv::new(&mut func, &arch, &Options::default());
    let ret = v(9);

    assert_eq!(env.remat_cost(v(1), ret), Some(1));
    // Two operands would have to be recomputed.
    assert_eq!(env.remat_cost(v(3), ret), None);
    // The frame pointer is always available.
    assert_eq!(env.remat_cost(v(4), ret), Some(2));
    // At least as expensive as spilling and reloading.
    assert_eq!(env.remat_cost(v(5), ret), None);
    assert_eq!(env.remat_cost(v(6), ret), None);
    assert_eq!(env.remat_cost(v(7), ret), None);
    // 7 for the operation itself plus 1 for its operand.
    assert_eq!(env.remat_cost(v(8), ret), None);
    assert!(env.is_rematerializable(v(4), ret));
    assert!(!env.is_rematerializable(v(8), ret));

    assert_eq!(env.reload_cost(v(4), ret), 4.0);
    assert_eq!(env.reload_cost(v(6), ret), 6.0);
    assert_eq!(env.reload_cost_unweighted(v(1), ret), 1);

    let options = Options {
        rematerialize: false,
        ..Options::default()
    };
    let env = SpillEnv::new(&mut func, &arch, &options);
    assert_eq!(env.reload_cost(v(4), ret), 6.0);
}

#[test]
fn remat_chosen_over_reload() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = const [remat]
    %1 = clobber
    %2 = use %0
    %3 = ret
",
    );
    let arch = GenericArchInfo::new(5, 3);
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(2), CLASS, true)
    });

    assert_eq!(stats.remats(), 1);
    assert_eq!(stats.reloads(), 0);
    assert_eq!(stats.spills(), 0);
    let copy = func.value_operands(v(2))[0];
    assert_ne!(copy, v(0));
    assert_eq!(func.sched_next(copy), Some(v(2)));
    assert!(func.value_flags(copy).contains(ValueFlags::REMAT_CLONE));
}

#[test]
fn reload_where_remat_is_disallowed() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = const [remat]
    %1 = clobber
    %2 = use %0
    %3 = clobber
    %4 = ret %0
",
    );
    let arch = GenericArchInfo::new(5, 3);
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(2), CLASS, true)?;
        env.register_reload(v(0), v(4), CLASS, false)
    });

    assert_eq!(stats.remats(), 1);
    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.spills(), 1);
    let remat = func.value_operands(v(2))[0];
    assert_eq!(func.opcode(remat), Opcode::Inst);
    assert!(func.value_flags(remat).contains(ValueFlags::REMAT_CLONE));
    let reload = func.value_operands(v(4))[0];
    assert_eq!(func.opcode(reload), Opcode::Reload);
    assert_eq!(func.value_type(reload), ValueType::Reg(CLASS));
    let spill = func.value_operands(reload)[1];
    assert_eq!(func.opcode(spill), Opcode::Spill);
    assert_eq!(func.value_operands(spill)[1], v(0));
}

#[test]
fn forced_remat_avoids_spill() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = const [remat]
    %1 = clobber
    %2 = use %0
    %3 = clobber
    %4 = ret %0
",
    );
    let arch = GenericArchInfo::new(3, 3);
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(2), CLASS, true)?;
        env.register_reload(v(0), v(4), CLASS, true)
    });

    assert_eq!(stats.spills(), 0);
    assert_eq!(stats.reloads(), 0);
    assert_eq!(stats.remats(), 2);
    let costs = total_spill_costs(&func, &arch);
    assert_eq!(costs.spills, 0);
    assert_eq!(costs.remats, 2);
    assert_eq!(costs.total(), 2.0);

    // The original definition has no users left.
    assert!(!func.is_scheduled(v(0)));
    assert_eq!(stats.dead_copies_pruned(), 1);
}

#[test]
fn dead_copies_kept_when_pruning_disabled() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = const [remat]
    %1 = clobber
    %2 = ret %0
",
    );
    let arch = GenericArchInfo::new(3, 3);
    let options = Options {
        prune_dead_copies: false,
        ..Options::default()
    };
    let stats = run(&mut func, &arch, &options, |env| {
        env.register_reload(v(0), v(2), CLASS, true)
    });

    assert_eq!(stats.remats(), 1);
    assert_eq!(stats.dead_copies_pruned(), 0);
    assert!(func.is_scheduled(v(0)));
    assert!(func.value_users(v(0)).is_empty());
}

#[test]
fn remat_with_operand() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = base [remat]
    %1:class0 = inc %0 [remat]
    %2 = clobber
    %3 = ret %1
",
    );
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(1), v(3), CLASS, true)
    });

    assert_eq!(stats.remats(), 1);
    assert_eq!(stats.dead_copies_pruned(), 2);
    let inc = func.value_operands(v(3))[0];
    let base = func.value_operands(inc)[0];
    assert_eq!(func.mnemonic(inc), Some("inc"));
    assert_eq!(func.mnemonic(base), Some("base"));
    assert_eq!(func.sched_next(base), Some(inc));
    assert_eq!(total_spill_costs(&func, &arch).remats, 2);
}

#[test]
fn caller_provided_remat() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = const [remat]
    %1 = clobber
    %2 = ret %0
",
    );
    let copy = func.clone_value(v(0), Block::ENTRY_BLOCK);
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_remat(v(0), v(2), copy)
    });

    assert_eq!(stats.remats(), 0);
    assert_eq!(stats.reloads(), 0);
    assert_eq!(stats.spills(), 0);
    assert_eq!(func.value_operands(v(2)), &[copy]);
    assert_eq!(func.sched_prev(v(2)), Some(copy));
}

#[test]
fn reload_merges_with_original_in_diamond() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(3), CLASS, true)
    });

    assert_eq!(stats.spills(), 1);
    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.ssa_phis(), 1);
    let phi = func.value_operands(v(6))[0];
    assert!(func.is_phi(phi));
    let [from_b1, from_b2] = func.value_operands(phi) else {
        panic!("phi should have 2 operands");
    };
    assert_eq!(func.opcode(*from_b1), Opcode::Reload);
    assert_eq!(*from_b2, v(0));
}

#[test]
fn reload_in_loop() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = def
    %1 = jump
block1 freq(10) preds(block0, block2):
    %2 = use %0
    %3 = branch
block2 freq(9) preds(block1):
    %4 = clobber
    %5 = jump
block3 freq(1) preds(block1):
    %6 = ret %0
",
    );
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(5), CLASS, true)
    });

    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.ssa_phis(), 1);
    let phi = func.value_operands(v(2))[0];
    assert!(func.is_phi(phi));
    assert_eq!(func.value_operands(v(6)), &[phi]);
    assert_eq!(func.value_operands(phi)[0], v(0));
    assert_eq!(func.opcode(func.value_operands(phi)[1]), Opcode::Reload);
}

#[test]
fn late_spills_are_joined_by_memory_phi() {
    let mut func = parse(
        "
block0 freq(4):
    %0:class0 = def
    %1 = branch %0
block1 freq(1) preds(block0):
    %2 = clobber
    %3 = jump
block2 freq(1) preds(block0):
    %4 = clobber
    %5 = jump
block3 freq(4) preds(block1, block2):
    %6 = use %0
    %7 = ret
",
    );
    let arch = GenericArchInfo::new(5, 3);
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_spill(v(0), v(2))?;
        env.register_spill(v(0), v(4))?;
        env.register_reload(v(0), v(6), CLASS, true)
    });

    assert_eq!(stats.spills(), 2);
    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.ssa_phis(), 1);
    let reload = func.value_operands(v(6))[0];
    assert_eq!(func.opcode(reload), Opcode::Reload);
    let mem_phi = func.value_operands(reload)[1];
    assert!(func.is_phi(mem_phi));
    assert_eq!(func.value_type(mem_phi), ValueType::Memory);
    for &spill in func.value_operands(mem_phi) {
        assert_eq!(func.opcode(spill), Opcode::Spill);
    }
}

#[test]
fn spilled_phi_becomes_memory_phi() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = c
    %1 = branch %0
block1 freq(1) preds(block0):
    %2:class0 = x
    %3 = jump
block2 freq(1) preds(block0):
    %4:class0 = y
    %5 = jump
block3 freq(1) preds(block1, block2):
    %6:class0 = phi %2, %4
    %7 = clobber
    %8 = ret %6
",
    );
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.spill_phi(v(6))?;
        env.register_reload(v(6), v(8), CLASS, true)
    });

    assert_eq!(stats.spilled_phis(), 1);
    assert_eq!(stats.spills(), 2);
    assert_eq!(stats.reloads(), 1);
    assert!(!func.is_scheduled(v(6)));

    let block3 = Block::new(3);
    let mem_phis: Vec<_> = func
        .block_insts(block3)
        .filter(|&value| func.is_phi(value))
        .collect();
    assert_eq!(mem_phis.len(), 1);
    let mem_phi = mem_phis[0];
    assert_eq!(func.value_type(mem_phi), ValueType::Memory);
    let operands = func.value_operands(mem_phi);
    assert_eq!(operands.len(), 2);
    for (&spill, original) in operands.iter().zip([v(2), v(4)]) {
        assert_eq!(func.opcode(spill), Opcode::Spill);
        assert_eq!(func.value_operands(spill)[1], original);
    }

    let reload = func.value_operands(v(8))[0];
    assert_eq!(func.opcode(reload), Opcode::Reload);
    assert_eq!(func.value_operands(reload)[1], mem_phi);
}

#[test]
fn insertion_points() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = x
    %1 = branch %0
block1 freq(1) preds(block0):
    %2 = jump
block2 freq(1) preds(block0, block1):
    %3:class0 = phi %0, %0
    %4 = ret %3
    %5 = keep %3
",
    );
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());
    let [b0, b1, b2] = [0, 1, 2].map(Block::new);

    assert_eq!(env.end_of_block_insertion_point(b0), Ok(v(1)));
    assert_eq!(env.end_of_block_insertion_point(b2), Ok(v(4)));
    assert_eq!(env.block_insertion_point(b1, 0), Ok(v(2)));
    assert_eq!(env.block_insertion_point(b2, 0), Ok(v(1)));
    assert_eq!(env.block_insertion_point(b2, 1), Ok(v(2)));

    env.register_reload_on_edge(v(0), b2, 1, CLASS, true).unwrap();
    env.register_reload_at_end(v(0), b0, CLASS, true).unwrap();
    assert_eq!(env.num_reloaders(v(0)), 2);
    assert_eq!(env.reload_cost_on_edge(v(0), b2, 1), Ok(5.0));
}

#[test]
fn usage_errors() {
    let mut func = parse(
        "
block0 freq(1):
    %0:class0 = x
    %1:class0 = pinned [dont_spill]
    %2 = branch %0
block1 freq(1) preds(block0):
    %3 = jump
block2 freq(1) preds(block0, block1):
    %4:class0 = phi %0, %0
    %5:class0 = phi %0, %0
    %6 = ret %4, %5, %1
    %7 = keep %4
",
    );
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    assert_eq!(
        env.register_spill(v(4), v(4)),
        Err(SpillError::SpillBeforePhi {
            value: v(4),
            after: v(4),
        })
    );
    assert_eq!(
        env.register_reload(v(4), v(7), CLASS, true),
        Err(SpillError::InvalidReloadPoint {
            value: v(4),
            before: v(7),
        })
    );
    assert_eq!(
        env.register_reload(v(1), v(6), CLASS, true),
        Err(SpillError::DontSpill(v(1)))
    );
    assert_eq!(
        env.register_spill(v(1), v(1)),
        Err(SpillError::DontSpill(v(1)))
    );
    assert_eq!(env.spill_points(v(1)).count(), 0);

    env.register_reload(v(0), v(6), CLASS, true).unwrap();
    let other = RegClass::new(1);
    assert_eq!(
        env.register_reload(v(0), v(6), other, true),
        Err(SpillError::ReloadClassMismatch {
            value: v(0),
            expected: CLASS,
            found: other,
        })
    );
}

#[test]
fn pinned_and_memory_operands() {
    let mut func = parse(
        "
%0 = frame
block0 freq(1):
    %1:class0 = x
    %2:class0 = pinned [dont_spill]
    %3:mem = spill %0, %1
    %4 = branch %1
block1 freq(1) preds(block0):
    %5 = jump
block2 freq(1) preds(block0, block1):
    %6:class0 = phi %1, %2
    %7:class0 = phi %2, %2 [dont_spill]
    %8 = ret %6, %7, %2
",
    );
    let arch = GenericArchInfo::default();
    let mut env = SpillEnv::new(&mut func, &arch, &Options::default());

    assert_eq!(
        env.register_reload(v(1), v(3), CLASS, true),
        Err(SpillError::InvalidReloadPoint {
            value: v(1),
            before: v(3),
        })
    );
    assert_eq!(env.spill_phi(v(6)), Err(SpillError::DontSpill(v(2))));
    assert_eq!(env.spill_phi(v(7)), Err(SpillError::DontSpill(v(7))));
    assert_eq!(env.spill_points(v(1)).count(), 0);
    assert_eq!(env.num_reloaders(v(6)), 0);

    let stats = env.insert_spills_reloads().unwrap();
    assert_eq!(stats.spills(), 0);
    assert_eq!(stats.spilled_phis(), 0);
    assert!(func.is_scheduled(v(6)));
}

#[test]
fn reload_of_unscheduled_value() {
    let mut func = parse(
        "
%0 = unknown
block0 freq(1):
    %1 = branch
block1 freq(1) preds(block0):
    %2 = use %0
    %3 = ret
block2 freq(1) preds(block0):
    %4 = ret %0
",
    );
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(2), CLASS, true)
    });

    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.spills(), 0);
    let no_mem = func.no_mem();
    let reload = func.value_operands(v(2))[0];
    assert_eq!(func.opcode(reload), Opcode::Reload);
    assert_eq!(func.value_operands(reload)[1], no_mem);
    assert_eq!(func.value_operands(v(4)), &[v(0)]);
}

#[test]
fn reload_before_merge_needs_no_phi() {
    let mut func = parse(DIAMOND);
    let arch = GenericArchInfo::default();
    let stats = run(&mut func, &arch, &Options::default(), |env| {
        env.register_reload(v(0), v(1), CLASS, true)
    });

    assert_eq!(stats.reloads(), 1);
    assert_eq!(stats.ssa_phis(), 0);
    let reload = func.value_operands(v(6))[0];
    assert_eq!(func.opcode(reload), Opcode::Reload);
    assert_eq!(func.value_block(reload), Block::new(0));
    assert!(!func.block_insts(Block::new(3)).any(|value| func.is_phi(value)));
}

#[test]
fn missing_terminator() {
    let mut func = Function::new();
    let block = func.add_block(1.0);
    func.append_op(block, Opcode::Inst, ValueType::None, &[]);
    let arch = GenericArchInfo::default();
    let env = SpillEnv::new(&mut func, &arch, &Options::default());

    assert_eq!(
        env.end_of_block_insertion_point(block),
        Err(SpillError::MissingTerminator(block))
    );
    assert_eq!(
        SpillError::MissingTerminator(block).to_string(),
        "block0 doesn't end with a terminator"
    );
}
