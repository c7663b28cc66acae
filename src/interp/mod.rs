//! The abstract interpreter: per-opcode dispatch, slot accounting, and the
//! per-block worklist pass that drives a [`Transfer<T>`] implementation to a
//! fixed point over a method's bytecode.
//!
//! [`AbstractInterpreter`] is deliberately thin: it owns no analysis-specific
//! state of its own. It decodes each instruction, maintains the operand
//! stack / local-variable-table slot bookkeeping that every analysis shares,
//! and calls into exactly one [`Transfer`] hook per instruction. Everything
//! about *what the analysis tracks* lives in `T` and the `Transfer<T>` impl;
//! everything about *how bytecode flows* lives here.

pub mod error;
pub mod opcode;
pub mod transfer;

pub use error::{AnalysisError, AnalysisResult};
pub use opcode::{Opcode, OpcodeCategory};
pub use transfer::{TopAnalysis, Transfer};

use std::cell::Cell;
use std::collections::BTreeMap;

use crate::analysis::cfg::BlockCfg;
use crate::analysis::fixed_point::{Analyzer, Cancellable, CancellationToken};
use crate::bindings::{BytecodeStream, ConstantPool};
use crate::common::ProgramCounter;
use crate::frame::{AbstractFrame, FrameError, Lattice, OperandStack, SizedValue, Slots};
use crate::types::{MethodDescriptor, ReturnType};

/// Drives a [`Transfer<T>`] implementation over a method's bytecode to a
/// per-bci fixed point.
///
/// Constructed over an already-partitioned [`BlockCfg`]: block leaders and
/// exception-handler edges are the caller's concern, not this type's.
pub struct AbstractInterpreter<'a, T, X> {
    stream: &'a mut dyn BytecodeStream,
    constants: &'a dyn ConstantPool,
    transfer: X,
    cfg: &'a BlockCfg,
    descriptor: &'a MethodDescriptor,
    is_static: bool,
    states: BTreeMap<ProgramCounter, AbstractFrame<T>>,
    last_visited: Cell<ProgramCounter>,
}

impl<'a, T, X> AbstractInterpreter<'a, T, X>
where
    T: Lattice + Clone + PartialEq,
    X: Transfer<T>,
{
    /// Creates an interpreter for the method described by `descriptor`/
    /// `is_static`, reading instructions from `stream` through `constants`,
    /// over the already-built `cfg`.
    pub fn new(
        stream: &'a mut dyn BytecodeStream,
        constants: &'a dyn ConstantPool,
        transfer: X,
        cfg: &'a BlockCfg,
        descriptor: &'a MethodDescriptor,
        is_static: bool,
    ) -> Self {
        Self {
            stream,
            constants,
            transfer,
            cfg,
            descriptor,
            is_static,
            states: BTreeMap::new(),
            last_visited: Cell::new(cfg.entry()),
        }
    }

    /// Drives the interpreter to a fixed point, returning the frame state
    /// recorded at every reachable bci (the state *entering* that
    /// instruction, before its own effect is applied).
    ///
    /// # Errors
    /// Propagates [`AnalysisError`] on stack underflow, a slot-width
    /// mismatch, an unsupported opcode, or malformed bytecode; returns
    /// [`Cancellable::Cancelled`] if `token` is cancelled first.
    #[tracing::instrument(skip_all, fields(entry = %self.cfg.entry(), is_static = self.is_static))]
    pub fn run(
        mut self,
        token: &CancellationToken,
    ) -> Result<BTreeMap<ProgramCounter, AbstractFrame<T>>, Cancellable<AnalysisError>> {
        Analyzer::analyze_cancellable(&mut self, token)?;
        tracing::debug!(bcis_visited = self.states.len(), "abstract interpretation reached fixed point");
        Ok(self.states)
    }

    fn initial_frame(&self) -> AbstractFrame<T> {
        let mut frame = AbstractFrame::new();
        let mut idx = 0u16;
        if !self.is_static {
            frame.locals.put(idx, SizedValue::one(T::top()));
            idx += 1;
        }
        for param in &self.descriptor.parameters_types {
            let slots = param.slots();
            frame.locals.put(idx, SizedValue::new(T::top(), slots));
            idx += slots.count();
        }
        frame
    }

    /// Builds the entry frame of an exception handler reached from a block
    /// whose exit state was `predecessor`: locals survive, the operand
    /// stack is cleared and replaced with a single one-slot exception
    /// reference.
    fn handler_entry_frame(&self, predecessor: &AbstractFrame<T>) -> AbstractFrame<T> {
        let mut frame = AbstractFrame {
            stack: OperandStack::new(),
            locals: predecessor.locals.clone(),
        };
        frame.stack.push(SizedValue::one(T::top()));
        frame
    }

    /// Runs the block starting at `start` from its entry frame through its
    /// last instruction, recording every instruction's entry state along
    /// the way, and returns `(last_bci, exit_frame)`.
    fn run_block(
        &mut self,
        start: ProgramCounter,
        entry_frame: &AbstractFrame<T>,
    ) -> Result<(ProgramCounter, AbstractFrame<T>), AnalysisError> {
        let last_bci = self
            .cfg
            .block(start)
            .expect("worklist only enqueues known block starts")
            .last_bci;

        let mut frame = entry_frame.clone();
        let mut bci = start;
        let mut wide = false;
        self.stream
            .advance_to(bci)
            .map_err(|_| AnalysisError::MalformedBytecode {
                at: bci,
                reason: "could not reposition bytecode stream at block start".into(),
            })?;
        loop {
            self.states.insert(bci, frame.clone());
            let opcode = self.stream.current_opcode()?;
            if opcode == Opcode::Wide {
                wide = true;
                let next = self.stream.next_bci();
                self.stream.advance_to(next)?;
                bci = next;
                continue;
            }

            self.dispatch(bci, opcode, wide, &mut frame)?;
            wide = false;

            if bci == last_bci {
                return Ok((bci, frame));
            }
            let next_bci = self.stream.next_bci();
            self.stream.advance_to(next_bci)?;
            bci = next_bci;
        }
    }

    fn dispatch(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        wide: bool,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use OpcodeCategory::*;
        match opcode.category() {
            Constant => self.do_constant(bci, opcode, frame),
            Load => self.do_load(bci, opcode, wide, frame),
            Store => self.do_store(bci, opcode, wide, frame),
            Array => self.do_array(bci, opcode, frame),
            StackOp => stack_op(opcode, &mut frame.stack).map_err(|e| AnalysisError::frame(bci, e)),
            Binary => self.do_binary(bci, opcode, frame),
            Unary => self.do_unary(bci, opcode, frame),
            Cast => self.do_cast(bci, opcode, frame),
            Compare => self.do_compare(bci, opcode, frame),
            Jump => self.do_jump(bci, opcode, wide, frame),
            Switch => self.do_switch(bci, opcode, frame),
            Invoke => self.do_invoke(bci, opcode, frame),
            New => self.do_new(bci, opcode, frame),
            Field => self.do_field(bci, opcode, frame),
            Monitor => self.do_monitor(bci, opcode, frame),
            Throw => self.do_throw(bci, frame),
            Return => self.do_return(bci, opcode, frame),
            Misc => self.do_misc(bci, opcode, wide, frame),
        }
    }

    fn do_constant(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        let (cpi, slots) = match opcode {
            Ldc => {
                let cpi = self.stream.read_cp_index(true)?;
                let value = self.constants.lookup_constant(cpi, opcode)?;
                (Some(cpi), value.slots())
            }
            LdcW | Ldc2W => {
                let cpi = self.stream.read_cp_index(false)?;
                let value = self.constants.lookup_constant(cpi, opcode)?;
                (Some(cpi), value.slots())
            }
            Bipush => {
                self.stream.read_u8()?;
                (None, Slots::One)
            }
            Sipush => {
                self.stream.read_i16()?;
                (None, Slots::One)
            }
            Lconst0 | Lconst1 | Dconst0 | Dconst1 => (None, Slots::Two),
            _ => (None, Slots::One),
        };
        let value = self.transfer.constant(bci, opcode, cpi);
        frame.stack.push(SizedValue::new(value, slots));
        Ok(())
    }

    /// The slot width and, for non-numbered opcodes, how to read the local
    /// index for a `*LOAD`/`*STORE` instruction.
    fn local_op_shape(&mut self, opcode: Opcode, wide: bool) -> Result<(Slots, u16), AnalysisError> {
        use Opcode::*;
        let (slots, implicit) = match opcode {
            Iload => (Slots::One, None),
            Iload0 => (Slots::One, Some(0)),
            Iload1 => (Slots::One, Some(1)),
            Iload2 => (Slots::One, Some(2)),
            Iload3 => (Slots::One, Some(3)),
            Fload => (Slots::One, None),
            Fload0 => (Slots::One, Some(0)),
            Fload1 => (Slots::One, Some(1)),
            Fload2 => (Slots::One, Some(2)),
            Fload3 => (Slots::One, Some(3)),
            Aload => (Slots::One, None),
            Aload0 => (Slots::One, Some(0)),
            Aload1 => (Slots::One, Some(1)),
            Aload2 => (Slots::One, Some(2)),
            Aload3 => (Slots::One, Some(3)),
            Lload => (Slots::Two, None),
            Lload0 => (Slots::Two, Some(0)),
            Lload1 => (Slots::Two, Some(1)),
            Lload2 => (Slots::Two, Some(2)),
            Lload3 => (Slots::Two, Some(3)),
            Dload => (Slots::Two, None),
            Dload0 => (Slots::Two, Some(0)),
            Dload1 => (Slots::Two, Some(1)),
            Dload2 => (Slots::Two, Some(2)),
            Dload3 => (Slots::Two, Some(3)),
            Istore => (Slots::One, None),
            Istore0 => (Slots::One, Some(0)),
            Istore1 => (Slots::One, Some(1)),
            Istore2 => (Slots::One, Some(2)),
            Istore3 => (Slots::One, Some(3)),
            Fstore => (Slots::One, None),
            Fstore0 => (Slots::One, Some(0)),
            Fstore1 => (Slots::One, Some(1)),
            Fstore2 => (Slots::One, Some(2)),
            Fstore3 => (Slots::One, Some(3)),
            Astore => (Slots::One, None),
            Astore0 => (Slots::One, Some(0)),
            Astore1 => (Slots::One, Some(1)),
            Astore2 => (Slots::One, Some(2)),
            Astore3 => (Slots::One, Some(3)),
            Lstore => (Slots::Two, None),
            Lstore0 => (Slots::Two, Some(0)),
            Lstore1 => (Slots::Two, Some(1)),
            Lstore2 => (Slots::Two, Some(2)),
            Lstore3 => (Slots::Two, Some(3)),
            Dstore => (Slots::Two, None),
            Dstore0 => (Slots::Two, Some(0)),
            Dstore1 => (Slots::Two, Some(1)),
            Dstore2 => (Slots::Two, Some(2)),
            Dstore3 => (Slots::Two, Some(3)),
            _ => unreachable!("local_op_shape only called for Load/Store opcodes"),
        };
        let index = match implicit {
            Some(i) => i,
            None => self.stream.read_local_index(wide)?,
        };
        Ok((slots, index))
    }

    fn do_load(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        wide: bool,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let (slots, index) = self.local_op_shape(opcode, wide)?;
        let stored = frame
            .locals
            .get(index)
            .map_err(|e| AnalysisError::frame(bci, e))?
            .clone();
        let produced = self.transfer.load(bci, opcode, &stored.value);
        frame.stack.push(SizedValue::new(produced, slots));
        Ok(())
    }

    fn do_store(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        wide: bool,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let (slots, index) = self.local_op_shape(opcode, wide)?;
        let popped = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        if popped.slots != slots {
            return Err(AnalysisError::frame(
                bci,
                FrameError::SlotMismatch {
                    position: frame.stack.len(),
                },
            ));
        }
        let produced = self.transfer.store(bci, opcode, &popped.value);
        frame.locals.put(index, SizedValue::new(produced, slots));
        if slots == Slots::Two {
            frame.locals.clear(index + 1);
        }
        Ok(())
    }

    fn array_elem_slots(opcode: Opcode) -> Slots {
        use Opcode::*;
        match opcode {
            Laload | Daload | Lastore | Dastore => Slots::Two,
            _ => Slots::One,
        }
    }

    fn do_array(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        if opcode == Arraylength {
            let arrayref = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            let result = self.transfer.array_length(bci, &arrayref.value);
            frame.stack.push(SizedValue::one(result));
            return Ok(());
        }
        let elem_slots = Self::array_elem_slots(opcode);
        let is_store = matches!(
            opcode,
            Iastore | Lastore | Fastore | Dastore | Aastore | Bastore | Castore | Sastore
        );
        if is_store {
            let value = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            let index = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            let arrayref = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            self.transfer
                .array_store(bci, opcode, &arrayref.value, &index.value, &value.value);
        } else {
            let index = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            let arrayref = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
            let result = self.transfer.array_load(bci, opcode, &arrayref.value, &index.value);
            frame.stack.push(SizedValue::new(result, elem_slots));
        }
        Ok(())
    }

    fn binary_shape(opcode: Opcode) -> (Slots, Slots, Slots) {
        use Opcode::*;
        match opcode {
            Ladd | Lsub | Lmul | Ldiv | Lrem | Land | Lor | Lxor => (Slots::Two, Slots::Two, Slots::Two),
            Dadd | Dsub | Dmul | Ddiv | Drem => (Slots::Two, Slots::Two, Slots::Two),
            Lshl | Lshr | Lushr => (Slots::Two, Slots::One, Slots::Two),
            _ => (Slots::One, Slots::One, Slots::One),
        }
    }

    fn do_binary(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let (lhs_slots, rhs_slots, result_slots) = Self::binary_shape(opcode);
        let rhs = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        let lhs = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        if rhs.slots != rhs_slots || lhs.slots != lhs_slots {
            return Err(AnalysisError::frame(
                bci,
                FrameError::SlotMismatch {
                    position: frame.stack.len(),
                },
            ));
        }
        let result = self.transfer.binary(bci, opcode, &lhs.value, &rhs.value);
        frame.stack.push(SizedValue::new(result, result_slots));
        Ok(())
    }

    fn do_unary(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let slots = match opcode {
            Opcode::Lneg | Opcode::Dneg => Slots::Two,
            _ => Slots::One,
        };
        let v = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        let result = self.transfer.unary(bci, opcode, &v.value);
        frame.stack.push(SizedValue::new(result, slots));
        Ok(())
    }

    fn cast_target_slots(opcode: Opcode) -> Slots {
        use Opcode::*;
        match opcode {
            I2l | I2d | L2d | F2l | F2d | D2l => Slots::Two,
            _ => Slots::One,
        }
    }

    fn do_cast(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let v = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        let result = self.transfer.cast(bci, opcode, &v.value);
        frame.stack.push(SizedValue::new(result, Self::cast_target_slots(opcode)));
        Ok(())
    }

    fn do_compare(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let operand_slots = match opcode {
            Opcode::Lcmp | Opcode::Dcmpl | Opcode::Dcmpg => Slots::Two,
            _ => Slots::One,
        };
        let rhs = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        let lhs = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        if rhs.slots != operand_slots || lhs.slots != operand_slots {
            return Err(AnalysisError::frame(
                bci,
                FrameError::SlotMismatch {
                    position: frame.stack.len(),
                },
            ));
        }
        let result = self.transfer.compare(bci, opcode, &lhs.value, &rhs.value);
        frame.stack.push(SizedValue::one(result));
        Ok(())
    }

    fn do_jump(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        wide: bool,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        match opcode {
            Goto => {
                self.stream.read_branch_dest(false)?;
            }
            GotoW => {
                self.stream.read_branch_dest(true)?;
            }
            Jsr | JsrW => {
                self.stream.read_branch_dest(opcode == JsrW)?;
                return Err(AnalysisError::UnsupportedOpcode { opcode, at: bci });
            }
            Ret => {
                self.stream.read_local_index(wide)?;
                return Err(AnalysisError::UnsupportedOpcode { opcode, at: bci });
            }
            Breakpoint => return Err(AnalysisError::UnsupportedOpcode { opcode, at: bci }),
            Ifnull | Ifnonnull => {
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                self.stream.read_branch_dest(false)?;
            }
            IfAcmpeq | IfAcmpne | IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple => {
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                self.stream.read_branch_dest(false)?;
            }
            _ => {
                // Ifeq/Ifne/Iflt/Ifge/Ifgt/Ifle
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                self.stream.read_branch_dest(false)?;
            }
        }
        Ok(())
    }

    fn do_switch(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        self.stream.align_switch_padding()?;
        self.stream.read_i32()?; // default target
        match opcode {
            Opcode::Tableswitch => {
                let low = self.stream.read_i32()?;
                let high = self.stream.read_i32()?;
                let count = (high - low + 1).max(0);
                for _ in 0..count {
                    self.stream.read_i32()?;
                }
            }
            Opcode::Lookupswitch => {
                let pairs = self.stream.read_i32()?.max(0);
                for _ in 0..pairs {
                    self.stream.read_i32()?;
                    self.stream.read_i32()?;
                }
            }
            _ => unreachable!("Switch category only covers these two opcodes"),
        }
        Ok(())
    }

    fn do_invoke(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        let cpi = self.stream.read_cp_index(false)?;
        if matches!(opcode, Invokeinterface | Invokedynamic) {
            self.stream.read_u8()?;
            self.stream.read_u8()?;
        }
        let resolved = self.constants.lookup_method(cpi, opcode, self.descriptor)?;
        let value_count = resolved.descriptor.parameters_types.len() + usize::from(resolved.has_receiver);
        let mut popped = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            popped.push(frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?.value);
        }
        popped.reverse();

        let mut args = Vec::with_capacity(popped.len() + usize::from(resolved.has_appendix));
        if resolved.has_appendix {
            args.push(self.transfer.invoke_appendix(bci, opcode, cpi));
        }
        args.extend(popped);

        let ret = self.transfer.invoke(bci, opcode, cpi, &args);
        if let ReturnType::Some(field_type) = &resolved.descriptor.return_type {
            frame.stack.push(SizedValue::new(ret, field_type.slots()));
        }
        Ok(())
    }

    fn do_new(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        match opcode {
            New => {
                let cpi = self.stream.read_cp_index(false)?;
                self.constants.lookup_type(cpi, opcode)?;
                let result = self.transfer.allocate(bci, opcode, &[]);
                frame.stack.push(SizedValue::one(result));
            }
            Newarray => {
                self.stream.read_u8()?;
                let dim = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                let result = self.transfer.allocate(bci, opcode, std::slice::from_ref(&dim.value));
                frame.stack.push(SizedValue::one(result));
            }
            Anewarray => {
                let cpi = self.stream.read_cp_index(false)?;
                self.constants.lookup_type(cpi, opcode)?;
                let dim = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                let result = self.transfer.allocate(bci, opcode, std::slice::from_ref(&dim.value));
                frame.stack.push(SizedValue::one(result));
            }
            Multianewarray => {
                let cpi = self.stream.read_cp_index(false)?;
                self.constants.lookup_type(cpi, opcode)?;
                let dims = self.stream.read_u8()?;
                let mut popped = Vec::with_capacity(dims as usize);
                for _ in 0..dims {
                    popped.push(frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?.value);
                }
                popped.reverse();
                let result = self.transfer.allocate(bci, opcode, &popped);
                frame.stack.push(SizedValue::one(result));
            }
            _ => unreachable!("New category only covers these opcodes"),
        }
        Ok(())
    }

    fn do_field(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        let cpi = self.stream.read_cp_index(false)?;
        let field = self.constants.lookup_field(cpi, self.descriptor, opcode)?;
        let slots = field.field_type.slots();
        match opcode {
            Getstatic => {
                let value = self.transfer.field_read(bci, opcode, cpi);
                frame.stack.push(SizedValue::new(value, slots));
            }
            Getfield => {
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                let value = self.transfer.field_read(bci, opcode, cpi);
                frame.stack.push(SizedValue::new(value, slots));
            }
            Putstatic => {
                let value = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                self.transfer.field_write(bci, opcode, cpi, &value.value);
            }
            Putfield => {
                let value = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                self.transfer.field_write(bci, opcode, cpi, &value.value);
            }
            _ => unreachable!("Field category only covers these opcodes"),
        }
        Ok(())
    }

    fn do_monitor(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        let v = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        self.transfer.monitor(bci, opcode, &v.value);
        Ok(())
    }

    fn do_throw(&mut self, bci: ProgramCounter, frame: &mut AbstractFrame<T>) -> Result<(), AnalysisError> {
        let v = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        self.transfer.throw(bci, &v.value);
        Ok(())
    }

    fn do_return(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        if opcode != Opcode::Return {
            frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
        }
        Ok(())
    }

    fn do_misc(
        &mut self,
        bci: ProgramCounter,
        opcode: Opcode,
        wide: bool,
        frame: &mut AbstractFrame<T>,
    ) -> Result<(), AnalysisError> {
        use Opcode::*;
        match opcode {
            Nop => {}
            Checkcast | Instanceof => {
                let cpi = self.stream.read_cp_index(false)?;
                self.constants.lookup_type(cpi, opcode)?;
                let v = frame.stack.pop().map_err(|e| AnalysisError::frame(bci, e))?;
                let result = self.transfer.type_check(bci, opcode, &v.value);
                frame.stack.push(SizedValue::one(result));
            }
            Iinc => {
                let index = self.stream.read_local_index(wide)?;
                self.stream.read_increment(wide)?;
                let current = frame
                    .locals
                    .get(index)
                    .map_err(|e| AnalysisError::frame(bci, e))?
                    .clone();
                let updated = self.transfer.unary(bci, opcode, &current.value);
                frame.locals.put(index, SizedValue::one(updated));
            }
            Wide => unreachable!("WIDE is consumed by run_block before dispatch"),
            _ => unreachable!("Misc category only covers these opcodes"),
        }
        Ok(())
    }
}

impl<'a, T, X> Analyzer for AbstractInterpreter<'a, T, X>
where
    T: Lattice + Clone + PartialEq,
    X: Transfer<T>,
{
    type Location = ProgramCounter;
    type Fact = AbstractFrame<T>;
    type Err = AnalysisError;
    type AffectedLocations = Vec<(ProgramCounter, AbstractFrame<T>)>;

    fn entry_fact(&self) -> Result<(ProgramCounter, AbstractFrame<T>), AnalysisError> {
        Ok((self.cfg.entry(), self.initial_frame()))
    }

    fn analyze_location(
        &mut self,
        location: &ProgramCounter,
        fact: &AbstractFrame<T>,
    ) -> Result<Self::AffectedLocations, AnalysisError> {
        self.last_visited.set(*location);
        tracing::trace!(block = %location, "worklist visiting block");
        let (_, out_state) = self.run_block(*location, fact)?;
        let block = self
            .cfg
            .block(*location)
            .expect("worklist only enqueues known block starts")
            .clone();

        let mut affected = Vec::with_capacity(block.successors.len() + block.exception_successors.len());
        for succ in block.successors {
            affected.push((succ, out_state.clone()));
        }
        for handler in block.exception_successors {
            affected.push((handler, self.handler_entry_frame(&out_state)));
        }
        Ok(affected)
    }

    fn merge_facts(
        &self,
        current_fact: &AbstractFrame<T>,
        incoming_fact: AbstractFrame<T>,
    ) -> Result<AbstractFrame<T>, AnalysisError> {
        current_fact
            .merge_with(&incoming_fact, |a, b| a.join(b))
            .map_err(|e| AnalysisError::frame(self.last_visited.get(), e))
    }
}

/// Executes a `StackOp`-category opcode's slot-width-sensitive rearrangement
/// of the top of `stack`, per the JVM's `dup`/`pop`/`swap` family semantics.
fn stack_op<T: Clone>(opcode: Opcode, stack: &mut OperandStack<T>) -> Result<(), FrameError> {
    use Opcode::*;
    match opcode {
        Pop => {
            stack.pop()?;
        }
        Pop2 => {
            let top = stack.pop()?;
            if top.slots == Slots::One {
                stack.pop()?;
            }
        }
        Dup => {
            let v = stack.peek(0)?.clone();
            stack.push(v);
        }
        DupX1 => {
            let v1 = stack.pop()?;
            let v2 = stack.pop()?;
            stack.push(v1.clone());
            stack.push(v2);
            stack.push(v1);
        }
        DupX2 => {
            let v1 = stack.pop()?;
            let v2 = stack.pop()?;
            if v2.slots == Slots::Two {
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            } else {
                let v3 = stack.pop()?;
                stack.push(v1.clone());
                stack.push(v3);
                stack.push(v2);
                stack.push(v1);
            }
        }
        Dup2 => {
            let v1 = stack.pop()?;
            if v1.slots == Slots::Two {
                stack.push(v1.clone());
                stack.push(v1);
            } else {
                let v2 = stack.pop()?;
                stack.push(v2.clone());
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            }
        }
        Dup2X1 => {
            let v1 = stack.pop()?;
            if v1.slots == Slots::Two {
                let v2 = stack.pop()?;
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            } else {
                let v2 = stack.pop()?;
                let v3 = stack.pop()?;
                stack.push(v2.clone());
                stack.push(v1.clone());
                stack.push(v3);
                stack.push(v2);
                stack.push(v1);
            }
        }
        Dup2X2 => {
            let v1 = stack.pop()?;
            if v1.slots == Slots::Two {
                let v2 = stack.pop()?;
                if v2.slots == Slots::Two {
                    stack.push(v1.clone());
                    stack.push(v2);
                    stack.push(v1);
                } else {
                    let v3 = stack.pop()?;
                    stack.push(v1.clone());
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                }
            } else {
                let v2 = stack.pop()?;
                let v3 = stack.pop()?;
                if v3.slots == Slots::Two {
                    stack.push(v2.clone());
                    stack.push(v1.clone());
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                } else {
                    let v4 = stack.pop()?;
                    stack.push(v2.clone());
                    stack.push(v1.clone());
                    stack.push(v4);
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                }
            }
        }
        Swap => {
            let v1 = stack.pop()?;
            let v2 = stack.pop()?;
            stack.push(v1);
            stack.push(v2);
        }
        _ => unreachable!("stack_op only called for StackOp-category opcodes"),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::*;
    use crate::bindings::{
        ClassRefHandle, CompilationMark, CompilationResult, ConstantValue, FrameTreeNode, ResolvedField,
        ResolvedMethod,
    };
    use crate::common::ConstantPoolIndex;
    use crate::debuginfo::{FrameValueKind, LocalValueEntry};
    use crate::types::{FieldType, PrimitiveType};

    struct ScriptedStream {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl ScriptedStream {
        fn new(bytes: Vec<u8>) -> Self {
            Self { bytes, pos: 0 }
        }
    }

    impl BytecodeStream for ScriptedStream {
        fn bci(&self) -> ProgramCounter {
            ProgramCounter::from(self.pos as u16)
        }

        fn current_opcode(&self) -> Result<Opcode, AnalysisError> {
            Opcode::from_byte(self.bytes[self.pos]).ok_or_else(|| AnalysisError::MalformedBytecode {
                at: self.bci(),
                reason: "bad opcode".into(),
            })
        }

        fn next_bci(&self) -> ProgramCounter {
            ProgramCounter::from(self.pos as u16 + 1)
        }

        fn read_u8(&mut self) -> Result<u8, AnalysisError> {
            self.pos += 1;
            Ok(self.bytes[self.pos])
        }

        fn read_i16(&mut self) -> Result<i16, AnalysisError> {
            self.pos += 2;
            Ok(0)
        }

        fn read_i32(&mut self) -> Result<i32, AnalysisError> {
            self.pos += 4;
            Ok(0)
        }

        fn read_local_index(&mut self, wide: bool) -> Result<u16, AnalysisError> {
            self.pos += if wide { 2 } else { 1 };
            Ok(0)
        }

        fn read_increment(&mut self, wide: bool) -> Result<i32, AnalysisError> {
            self.pos += if wide { 2 } else { 1 };
            Ok(1)
        }

        fn read_branch_dest(&mut self, wide: bool) -> Result<ProgramCounter, AnalysisError> {
            self.pos += if wide { 4 } else { 2 };
            Ok(ProgramCounter::ZERO)
        }

        fn read_cp_index(&mut self, narrow: bool) -> Result<ConstantPoolIndex, AnalysisError> {
            self.pos += if narrow { 1 } else { 2 };
            Ok(ConstantPoolIndex::from(1))
        }

        fn align_switch_padding(&mut self) -> Result<(), AnalysisError> {
            Ok(())
        }

        fn advance_to(&mut self, bci: ProgramCounter) -> Result<(), AnalysisError> {
            self.pos = bci.0 as usize;
            Ok(())
        }
    }

    struct DummyConstants;

    impl ConstantPool for DummyConstants {
        fn lookup_constant(&self, _cpi: ConstantPoolIndex, _opcode: Opcode) -> Result<ConstantValue, AnalysisError> {
            Ok(ConstantValue::Int(42))
        }

        fn lookup_type(&self, _cpi: ConstantPoolIndex, _opcode: Opcode) -> Result<ClassRefHandle, AnalysisError> {
            Ok(ClassRefHandle("java/lang/Object".into()))
        }

        fn lookup_field(
            &self,
            _cpi: ConstantPoolIndex,
            _enclosing_method: &MethodDescriptor,
            _opcode: Opcode,
        ) -> Result<ResolvedField, AnalysisError> {
            Ok(ResolvedField {
                field_type: FieldType::Base(PrimitiveType::Int),
                is_static: true,
            })
        }

        fn lookup_method(
            &self,
            _cpi: ConstantPoolIndex,
            _opcode: Opcode,
            _enclosing_method: &MethodDescriptor,
        ) -> Result<ResolvedMethod, AnalysisError> {
            Ok(ResolvedMethod {
                descriptor: MethodDescriptor {
                    parameters_types: vec![],
                    return_type: ReturnType::Void,
                },
                has_receiver: false,
                has_appendix: false,
            })
        }

        fn lookup_appendix(&self, _cpi: ConstantPoolIndex, _opcode: Opcode) -> Option<ClassRefHandle> {
            None
        }

        fn load_referenced_type(
            &self,
            _cpi: ConstantPoolIndex,
            _opcode: Opcode,
            _initializing: bool,
        ) -> Option<ClassRefHandle> {
            None
        }
    }

    // Unused in these tests but required by the trait object signatures
    // elsewhere in the crate; kept here only to satisfy imports.
    #[allow(dead_code)]
    struct UnusedFrameTreeNode;
    impl FrameTreeNode for UnusedFrameTreeNode {
        fn range(&self) -> (crate::common::CodeOffset, crate::common::CodeOffset) {
            (crate::common::CodeOffset::from(0), crate::common::CodeOffset::from(0))
        }
        fn bytecode_position(&self) -> Option<(ClassRefHandle, ProgramCounter)> {
            None
        }
        fn is_leaf(&self) -> bool {
            true
        }
        fn children(&self) -> Vec<&dyn FrameTreeNode> {
            vec![]
        }
        fn num_locals(&self) -> u32 {
            0
        }
        fn local_value(&self, _index: u32) -> LocalValueEntry {
            LocalValueEntry::Undefined
        }
        fn local_kind(&self, _index: u32) -> FrameValueKind {
            FrameValueKind::Illegal
        }
    }
    #[allow(dead_code)]
    fn unused(_: &dyn CompilationResult, _: &CompilationMark) {}

    fn void_descriptor() -> MethodDescriptor {
        MethodDescriptor {
            parameters_types: vec![],
            return_type: ReturnType::Void,
        }
    }

    #[test]
    fn constant_then_return_leaves_one_slot_on_stack() {
        // ldc #1 (18, 1); ireturn (172)
        let mut stream = ScriptedStream::new(vec![18, 1, 172]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let cfg = BlockCfg::build(&mut stream, &leaders, &[]).unwrap();
        let constants = DummyConstants;
        let descriptor = void_descriptor();

        let interp = AbstractInterpreter::new(&mut stream, &constants, TopAnalysis, &cfg, &descriptor, true);
        let states = interp.run(&CancellationToken::new()).unwrap();

        let at_ireturn = &states[&ProgramCounter::from(2)];
        assert_eq!(at_ireturn.stack.len(), 1);
        assert_eq!(at_ireturn.stack.peek(0).unwrap().slots, Slots::One);
    }

    #[test]
    fn ldc2w_then_pop2_empties_the_stack() {
        // ldc2_w #1 (20, 0, 1); pop2 (88); return (177)
        let mut stream = ScriptedStream::new(vec![20, 0, 1, 88, 177]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let cfg = BlockCfg::build(&mut stream, &leaders, &[]).unwrap();

        struct LongConstants;
        impl ConstantPool for LongConstants {
            fn lookup_constant(&self, _: ConstantPoolIndex, _: Opcode) -> Result<ConstantValue, AnalysisError> {
                Ok(ConstantValue::Long(9))
            }
            fn lookup_type(&self, _: ConstantPoolIndex, _: Opcode) -> Result<ClassRefHandle, AnalysisError> {
                unreachable!()
            }
            fn lookup_field(
                &self,
                _: ConstantPoolIndex,
                _: &MethodDescriptor,
                _: Opcode,
            ) -> Result<ResolvedField, AnalysisError> {
                unreachable!()
            }
            fn lookup_method(
                &self,
                _: ConstantPoolIndex,
                _: Opcode,
                _: &MethodDescriptor,
            ) -> Result<ResolvedMethod, AnalysisError> {
                unreachable!()
            }
            fn lookup_appendix(&self, _: ConstantPoolIndex, _: Opcode) -> Option<ClassRefHandle> {
                None
            }
            fn load_referenced_type(&self, _: ConstantPoolIndex, _: Opcode, _: bool) -> Option<ClassRefHandle> {
                None
            }
        }

        let constants = LongConstants;
        let descriptor = void_descriptor();
        let interp = AbstractInterpreter::new(&mut stream, &constants, TopAnalysis, &cfg, &descriptor, true);
        let states = interp.run(&CancellationToken::new()).unwrap();

        let at_return = &states[&ProgramCounter::from(4)];
        assert!(at_return.stack.is_empty());
    }

    #[test]
    fn stack_op_dup_x2_form2_duplicates_category1_below_a_category2_value() {
        // JVMS dup_x2 form 2: ..., value2(cat2), value1(cat1) ->
        // ..., value1, value2, value1
        let mut stack: OperandStack<i32> = OperandStack::new();
        stack.push(SizedValue::two(5));
        stack.push(SizedValue::one(1));
        stack_op(Opcode::DupX2, &mut stack).unwrap();
        assert_eq!(stack.slot_height(), 1 + 2 + 1);
        assert_eq!(stack.peek(0).unwrap().value, 1);
        assert_eq!(stack.peek(1).unwrap().value, 5);
        assert_eq!(stack.peek(2).unwrap().value, 1);
    }

    #[test]
    fn stack_op_pop2_on_single_two_slot_value_empties_stack() {
        let mut stack: OperandStack<i32> = OperandStack::new();
        stack.push(SizedValue::two(7));
        stack_op(Opcode::Pop2, &mut stack).unwrap();
        assert!(stack.is_empty());
    }

    #[test]
    fn monitorenter_and_exit_each_pop_one_reference() {
        // aload_0 (42); monitorenter (194); aload_0 (42); monitorexit (195);
        // return (177)
        let mut stream = ScriptedStream::new(vec![42, 194, 42, 195, 177]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let cfg = BlockCfg::build(&mut stream, &leaders, &[]).unwrap();
        let constants = DummyConstants;
        let descriptor = void_descriptor();
        let interp = AbstractInterpreter::new(&mut stream, &constants, TopAnalysis, &cfg, &descriptor, false);
        let states = interp.run(&CancellationToken::new()).unwrap();
        assert!(states.contains_key(&ProgramCounter::from(4)));
    }
}
