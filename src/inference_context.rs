//! Constraint generation: walking a function and emitting the constraint
//! system its instructions impose on the types of its values.

use crate::constraints::{Constraint, TypeVariable};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::il::{BinaryOp, Constant, Function, Instruction, Opcode, ValueDef, ValueId};
use crate::inference_config::CONFIG;
use crate::lattice::{CodePointerKind, TypeIndex, TypePool};
use crate::log::*;
use crate::memory_order::{DefiningAccess, MemoryOracle};
use crate::target::TargetDescriptor;

/// Why a generated function could not be processed. These are defects in the
/// input IR (the caller's responsibility), not data conditions.
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("value {0:?} is a pointer-indexing operation; expected IR lowered to address arithmetic")]
    UnloweredPointerIndexing(ValueId),
    #[error("value {0:?} has an opcode the generator cannot classify")]
    UnknownOpcode(ValueId),
    #[error("constant expression at value {0:?} wraps a non-value-producing operation")]
    UnexpectedConstant(ValueId),
}

/// What a type variable stands for.
#[derive(Clone, Copy, Debug)]
pub enum VariableOrigin {
    /// The unknown type of an IR value.
    Value(ValueId),
    /// A literal lattice element minted by the generator.
    Builtin(TypeIndex),
}

/// The output of constraint generation: the ordered constraint list plus the
/// registry mapping IR values to type variables and built-in variables to
/// their literal types.
pub struct ConstraintSystem {
    pub(crate) pool: TypePool,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) variables: Vec<VariableOrigin>,
    pub(crate) value_variables: UnorderedMap<ValueId, TypeVariable>,
}

impl ConstraintSystem {
    /// The generated constraints, in emission order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Total number of type variables, dense in `0..variable_count()`.
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// The literal type a built-in variable is pre-bound to, if `tv` is a
    /// built-in.
    pub fn bound_type(&self, tv: TypeVariable) -> Option<TypeIndex> {
        match self.variables.get(tv.0) {
            Some(VariableOrigin::Builtin(idx)) => Some(*idx),
            _ => None,
        }
    }

    /// The type variable allocated for an IR value, if the walk reached it.
    pub fn variable_for_value(&self, value: ValueId) -> Option<TypeVariable> {
        self.value_variables.get(&value).copied()
    }

    /// The lattice-type arena of this run.
    pub fn pool(&self) -> &TypePool {
        &self.pool
    }
}

/// Walks one function and emits its constraint system. One type variable is
/// allocated per distinct IR value, in first-encounter order; built-in
/// variables pre-bound to literal lattice elements are interleaved into the
/// same dense space.
pub struct InferenceContext<'a> {
    function: &'a Function,
    oracle: &'a dyn MemoryOracle,
    target: &'a TargetDescriptor,
    pool: TypePool,
    constraints: Vec<Constraint>,
    variables: Vec<VariableOrigin>,
    value_variables: UnorderedMap<ValueId, TypeVariable>,
    visited_constants: UnorderedSet<ValueId>,
}

impl<'a> InferenceContext<'a> {
    pub fn new(
        function: &'a Function,
        oracle: &'a dyn MemoryOracle,
        target: &'a TargetDescriptor,
    ) -> Self {
        Self {
            function,
            oracle,
            target,
            pool: TypePool::new(),
            constraints: vec![],
            variables: vec![],
            value_variables: UnorderedMap::new(),
            visited_constants: UnorderedSet::new(),
        }
    }

    /// The type variable for an IR value, allocating it on first sight.
    fn value_variable(&mut self, value: ValueId) -> TypeVariable {
        if let Some(&tv) = self.value_variables.get(&value) {
            return tv;
        }
        let tv = TypeVariable(self.variables.len());
        self.variables.push(VariableOrigin::Value(value));
        self.value_variables.insert(value, tv);
        tv
    }

    /// Mutable access to the lattice-type arena, for building pointee types
    /// to hand to [`Self::data_pointer`].
    pub fn pool_mut(&mut self) -> &mut TypePool {
        &mut self.pool
    }

    /// A fresh variable pre-bound to the given literal type.
    fn builtin_variable(&mut self, typ: TypeIndex) -> TypeVariable {
        let tv = TypeVariable(self.variables.len());
        self.variables.push(VariableOrigin::Builtin(typ));
        tv
    }

    /// A fresh variable bound to the top of the lattice.
    pub fn any(&mut self) -> TypeVariable {
        let t = self.pool.any();
        self.builtin_variable(t)
    }

    /// A boolean: an unsigned 1-bit integer.
    pub fn boolean(&mut self) -> TypeVariable {
        self.unsigned(1)
    }

    pub fn num(&mut self, width: usize) -> TypeVariable {
        let t = self.pool.integral(width);
        self.builtin_variable(t)
    }

    pub fn signed(&mut self, width: usize) -> TypeVariable {
        let t = self.pool.signed(width);
        self.builtin_variable(t)
    }

    pub fn unsigned(&mut self, width: usize) -> TypeVariable {
        let t = self.pool.unsigned(width);
        self.builtin_variable(t)
    }

    pub fn pointer(&mut self) -> TypeVariable {
        let t = self.pool.pointer(self.target.pointer_width_bits());
        self.builtin_variable(t)
    }

    pub fn data_pointer(&mut self, pointee: TypeIndex) -> TypeVariable {
        let t = self
            .pool
            .data_pointer(self.target.pointer_width_bits(), pointee);
        self.builtin_variable(t)
    }

    pub fn function_pointer(&mut self) -> TypeVariable {
        let t = self
            .pool
            .code_pointer(self.target.pointer_width_bits(), CodePointerKind::Function);
        self.builtin_variable(t)
    }

    pub fn label_pointer(&mut self) -> TypeVariable {
        let t = self
            .pool
            .code_pointer(self.target.pointer_width_bits(), CodePointerKind::Label);
        self.builtin_variable(t)
    }

    fn specializes(&mut self, left: TypeVariable, right: TypeVariable) {
        self.constraints.push(Constraint::Specializes { left, right });
    }

    fn generalizes(&mut self, left: TypeVariable, right: TypeVariable) {
        self.constraints.push(Constraint::Generalizes { left, right });
    }

    fn is_equal(&mut self, left: TypeVariable, right: TypeVariable) {
        self.constraints.push(Constraint::IsEqual { left, right });
    }

    /// Visit every instruction of the function exactly once, emitting
    /// constraints. On error the constraint system is meaningless and the
    /// run must be abandoned.
    pub fn visit_function(&mut self) -> Result<(), GenerationError> {
        let function = self.function;
        for block in function.blocks() {
            for &id in &block.instructions {
                self.visit_instruction_value(id)?;
            }
        }
        if CONFIG.debug_print_constraints {
            for constraint in &self.constraints {
                debug!("generated constraint"; "constraint" => %constraint);
            }
        }
        Ok(())
    }

    /// Consume the context, handing the generated system to a solver.
    pub fn finish(self) -> ConstraintSystem {
        ConstraintSystem {
            pool: self.pool,
            constraints: self.constraints,
            variables: self.variables,
            value_variables: self.value_variables,
        }
    }

    fn visit_instruction_value(&mut self, id: ValueId) -> Result<(), GenerationError> {
        let function = self.function;
        let inst = match function.value(id) {
            ValueDef::Instruction(inst) => inst,
            ValueDef::Constant(_) => {
                // Constants are visited through their users.
                return Ok(());
            }
        };
        let key = self.value_variable(id);
        self.visit_instruction(id, inst, key)
    }

    /// Visit the constant operands of `inst`, then `inst` itself with `key`
    /// as the variable receiving its result constraints.
    fn visit_instruction(
        &mut self,
        id: ValueId,
        inst: &Instruction,
        key: TypeVariable,
    ) -> Result<(), GenerationError> {
        let function = self.function;
        for &op in &inst.operands {
            if let ValueDef::Constant(constant) = function.value(op) {
                if self.visited_constants.insert(op) {
                    self.visit_constant(op, constant)?;
                }
            }
        }

        match &inst.opcode {
            Opcode::ICmp(pred) => {
                let boolean = self.boolean();
                self.specializes(key, boolean);
                if pred.is_equality() || !CONFIG.infer_signedness_from_comparisons {
                    return Ok(());
                }
                let (min, max) = if pred.is_signed() {
                    (self.signed(8), self.signed(64))
                } else {
                    debug_assert!(pred.is_unsigned());
                    (self.unsigned(8), self.unsigned(64))
                };
                for &op in &inst.operands {
                    let operand = self.value_variable(op);
                    self.specializes(operand, min);
                    self.generalizes(operand, max);
                }
            }
            Opcode::Alloca => {
                let pointer = self.pointer();
                self.specializes(key, pointer);
            }
            Opcode::Load => {
                let address = self.value_variable(inst.operands[0]);
                let pointer = self.pointer();
                self.specializes(address, pointer);
                let num = self.num(inst.width);
                self.generalizes(key, num);

                if CONFIG.unify_loads_with_defining_stores {
                    self.refine_load_through_oracle(id, key);
                }
            }
            Opcode::Store => {
                // Teaches us nothing by itself; memory locations are reused
                // for unrelated types. The store only matters as a defining
                // access that a later load may observe.
            }
            Opcode::GetElementPtr => {
                return Err(GenerationError::UnloweredPointerIndexing(id));
            }
            Opcode::Phi => {
                for &incoming in &inst.operands {
                    let tv = self.value_variable(incoming);
                    self.is_equal(key, tv);
                }
            }
            Opcode::Select => {
                let condition = self.value_variable(inst.operands[0]);
                let true_value = self.value_variable(inst.operands[1]);
                let false_value = self.value_variable(inst.operands[2]);
                let boolean = self.boolean();
                self.specializes(condition, boolean);
                self.is_equal(true_value, false_value);
                self.generalizes(key, true_value);
            }
            Opcode::Call => {
                // Argument and return typing is out of scope for this core.
            }
            Opcode::Binary(op) => {
                self.visit_binary_operator(*op, inst, key);
            }
            Opcode::IntCast => {
                let casted = self.value_variable(inst.operands[0]);
                let num = self.num(inst.width);
                // Try to imply that the value had this type all along; fall
                // back to an actual conversion.
                self.constraints.push(Constraint::Disjunction(vec![
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left: casted,
                            right: num,
                        },
                        Constraint::IsEqual {
                            left: key,
                            right: casted,
                        },
                    ]),
                    Constraint::Specializes {
                        left: key,
                        right: num,
                    },
                ]));
            }
            Opcode::PointerCast => {
                let casted = self.value_variable(inst.operands[0]);
                let pointer = self.pointer();
                self.constraints.push(Constraint::Disjunction(vec![
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left: casted,
                            right: pointer,
                        },
                        Constraint::IsEqual {
                            left: key,
                            right: casted,
                        },
                    ]),
                    Constraint::Specializes {
                        left: key,
                        right: pointer,
                    },
                ]));
            }
            Opcode::Branch | Opcode::CondBranch | Opcode::Return | Opcode::Unreachable => {
                // Terminators constrain nothing.
            }
            Opcode::Unknown => {
                return Err(GenerationError::UnknownOpcode(id));
            }
        }
        Ok(())
    }

    fn visit_binary_operator(&mut self, op: BinaryOp, inst: &Instruction, key: TypeVariable) {
        let left = self.value_variable(inst.operands[0]);
        let right = self.value_variable(inst.operands[1]);

        match op {
            // Division and remainder produce a result no wider than their
            // inputs.
            BinaryOp::SDiv | BinaryOp::SRem | BinaryOp::LShr => {
                if CONFIG.infer_signedness_from_div_rem {
                    let unsigned = self.unsigned(0);
                    self.specializes(key, unsigned);
                }
                self.generalizes(key, left);
                self.generalizes(key, right);
            }
            BinaryOp::UDiv | BinaryOp::URem | BinaryOp::AShr => {
                if CONFIG.infer_signedness_from_div_rem {
                    let signed = self.signed(0);
                    self.specializes(key, signed);
                }
                self.generalizes(key, left);
                self.generalizes(key, right);
            }
            BinaryOp::And => {
                // Masking is used to truncate integers, signed ones and even
                // pointers included, so signedness stays uncommitted.
                self.generalizes(key, left);
                self.generalizes(key, right);
            }
            BinaryOp::Add => {
                let numeric = self.num(0);
                let pointer = self.pointer();
                self.constraints.push(Constraint::Disjunction(vec![
                    // Both sides are integers.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: numeric,
                        },
                        Constraint::Specializes { left: key, right: left },
                        Constraint::Specializes {
                            left: key,
                            right,
                        },
                    ]),
                    // Pointer plus integer offset.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: key,
                            right: pointer,
                        },
                    ]),
                    // Integer offset plus pointer.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: key,
                            right: pointer,
                        },
                    ]),
                ]));
            }
            BinaryOp::Sub => {
                // `0 - x` is two's-complement negation.
                if self.operand_is_int_constant(inst.operands[0], 0) {
                    let signed = self.signed(0);
                    self.specializes(right, signed);
                    self.is_equal(key, right);
                    return;
                }
                let numeric = self.num(0);
                let pointer = self.pointer();
                self.constraints.push(Constraint::Disjunction(vec![
                    // Both sides are integers.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: numeric,
                        },
                        Constraint::Specializes { left: key, right: left },
                        Constraint::Specializes {
                            left: key,
                            right,
                        },
                    ]),
                    // Pointer minus integer offset.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: key,
                            right: pointer,
                        },
                    ]),
                    // Integer minus pointer.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: numeric,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: key,
                            right: pointer,
                        },
                    ]),
                    // Pointer difference yields an integer.
                    Constraint::Conjunction(vec![
                        Constraint::Specializes {
                            left,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: right,
                            right: pointer,
                        },
                        Constraint::Specializes {
                            left: key,
                            right: numeric,
                        },
                    ]),
                ]));
            }
            BinaryOp::Xor => {
                // `x ^ ~0` is bitwise negation.
                let all_ones_side = [inst.operands[1], inst.operands[0]]
                    .into_iter()
                    .find(|&op| self.operand_is_all_ones(op));
                if let Some(mask) = all_ones_side {
                    let other = if mask == inst.operands[1] { left } else { right };
                    let unsigned = self.unsigned(0);
                    self.specializes(other, unsigned);
                    self.is_equal(key, other);
                } else {
                    self.specializes(key, left);
                    self.specializes(key, right);
                }
            }
            // Everything else produces an output at least as large as its
            // inputs.
            BinaryOp::Mul | BinaryOp::Or | BinaryOp::Shl => {
                self.specializes(key, left);
                self.specializes(key, right);
            }
        }
    }

    fn operand_is_int_constant(&self, value: ValueId, expected: u64) -> bool {
        match self.function.value(value) {
            ValueDef::Constant(c) => c.is_int_equal_to(expected),
            _ => false,
        }
    }

    fn operand_is_all_ones(&self, value: ValueId) -> bool {
        match self.function.value(value) {
            ValueDef::Constant(c) => c.is_all_ones(),
            _ => false,
        }
    }

    /// Ask the memory-order oracle which write this load observes; a load
    /// defined by a store to the same location carries the stored value's
    /// type.
    fn refine_load_through_oracle(&mut self, load: ValueId, key: TypeVariable) {
        let function = self.function;
        match self.oracle.defining_access(load) {
            DefiningAccess::Store(store_id) => match function.value(store_id) {
                ValueDef::Instruction(store) if store.opcode == Opcode::Store => {
                    let stored = self.value_variable(store.operands[1]);
                    self.is_equal(key, stored);
                }
                _ => {
                    debug!(
                        "Defining access of load is not a store; skipping refinement";
                        "load" => ?load, "claimed" => ?store_id,
                    );
                }
            },
            DefiningAccess::Call(_) | DefiningAccess::LiveOnEntry => {}
        }
    }

    fn visit_constant(&mut self, id: ValueId, constant: &Constant) -> Result<(), GenerationError> {
        match constant {
            Constant::Int { value, width } => {
                let tv = self.value_variable(id);
                // Disjunction over whether the value is meant as signed.
                let signed = self.signed(Constant::min_signed_bits(*value, *width));
                let unsigned = self.unsigned(Constant::active_bits(*value));
                self.constraints.push(Constraint::Disjunction(vec![
                    Constraint::Specializes {
                        left: tv,
                        right: signed,
                    },
                    Constraint::Specializes {
                        left: tv,
                        right: unsigned,
                    },
                ]));
                let num = self.num(*width);
                self.generalizes(tv, num);
                Ok(())
            }
            Constant::Global | Constant::Undef => Ok(()),
            Constant::Expr(inst) => {
                if !produces_value(&inst.opcode) {
                    return Err(GenerationError::UnexpectedConstant(id));
                }
                let key = self.value_variable(id);
                self.visit_instruction(id, inst, key)
            }
        }
    }
}

/// Whether an opcode yields a result a constant expression could stand for.
fn produces_value(opcode: &Opcode) -> bool {
    !matches!(opcode, Opcode::Store) && !opcode.is_terminator()
}
