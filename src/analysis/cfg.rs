//! Basic-block partitioning of a bytecode stream, successor edges, and
//! exception-handler edges.
//!
//! Block *boundaries* (leaders) are supplied by the caller, matching how an
//! ahead-of-time pipeline typically already knows where its basic blocks
//! start from an earlier pass; this module's job is only to decode each
//! block's terminating instruction and wire up the successor/exception
//! edges a worklist driver walks.

use std::collections::{BTreeMap, BTreeSet};

use crate::bindings::{BytecodeStream, ClassRefHandle};
use crate::common::ProgramCounter;
use crate::interp::opcode::{Opcode, OpcodeCategory};
use crate::interp::AnalysisError;

/// One entry of a method's exception table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First bci covered by this handler (inclusive).
    pub start: ProgramCounter,
    /// Last bci covered by this handler (exclusive).
    pub end: ProgramCounter,
    /// The bci of the handler's first instruction.
    pub handler: ProgramCounter,
    /// The catch type, or `None` for a `finally`-style catch-all.
    pub catch_type: Option<ClassRefHandle>,
}

impl ExceptionHandler {
    /// Whether this handler covers `bci`.
    #[must_use]
    pub fn covers(&self, bci: ProgramCounter) -> bool {
        bci >= self.start && bci < self.end
    }
}

/// How a block's terminating instruction transfers control.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminator {
    /// Falls through to the next leader with no branch.
    Fallthrough,
    /// Unconditionally jumps to a single target (`GOTO`/`GOTO_W`).
    Jump(ProgramCounter),
    /// May fall through or jump (`IF*`).
    Conditional(ProgramCounter),
    /// Branches to one of several targets plus a default
    /// (`TABLESWITCH`/`LOOKUPSWITCH`).
    Switch {
        default: ProgramCounter,
        cases: Vec<ProgramCounter>,
    },
    /// Ends the method (`*RETURN`) or the straight-line region
    /// (`ATHROW`): no fallthrough/non-exception successor.
    Terminal,
}

/// A single basic block: a maximal straight-line instruction run between
/// two leaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// The bci of this block's first instruction.
    pub start: ProgramCounter,
    /// The bci of this block's last instruction (not the byte past it).
    pub last_bci: ProgramCounter,
    /// Non-exception successor block start bcis.
    pub successors: Vec<ProgramCounter>,
    /// Exception-handler block start bcis reachable from any bci in this
    /// block.
    pub exception_successors: Vec<ProgramCounter>,
}

/// The partitioned control-flow graph of a method's bytecode.
#[derive(Debug, Clone)]
pub struct BlockCfg {
    blocks: BTreeMap<ProgramCounter, BasicBlock>,
    entry: ProgramCounter,
}

impl BlockCfg {
    /// Builds the graph from caller-supplied block leaders and the
    /// method's exception table.
    ///
    /// `leaders` must contain the method's entry bci; every other bci is
    /// the start of some instruction. `stream` is decoded once per
    /// instruction to determine each block's terminator.
    ///
    /// # Errors
    /// Propagates [`AnalysisError::MalformedBytecode`] if decoding a
    /// terminating instruction's operands fails.
    pub fn build(
        stream: &mut dyn BytecodeStream,
        leaders: &BTreeSet<ProgramCounter>,
        handlers: &[ExceptionHandler],
    ) -> Result<Self, AnalysisError> {
        let entry = *leaders
            .iter()
            .next()
            .expect("a method has at least one leader");
        let ordered: Vec<ProgramCounter> = leaders.iter().copied().collect();
        let mut blocks = BTreeMap::new();

        for (i, &start) in ordered.iter().enumerate() {
            let block_end_exclusive = ordered.get(i + 1).copied();
            let (last_bci, terminator) = decode_block(stream, start, block_end_exclusive)?;

            let mut successors = Vec::new();
            match &terminator {
                Terminator::Fallthrough => {
                    if let Some(next) = block_end_exclusive {
                        successors.push(next);
                    }
                }
                Terminator::Jump(target) => successors.push(*target),
                Terminator::Conditional(target) => {
                    successors.push(*target);
                    if let Some(next) = block_end_exclusive {
                        successors.push(next);
                    }
                }
                Terminator::Switch { default, cases } => {
                    successors.push(*default);
                    successors.extend(cases.iter().copied());
                }
                Terminator::Terminal => {}
            }

            let exception_successors = handlers
                .iter()
                .filter(|h| block_covers_any(start, last_bci, h))
                .map(|h| h.handler)
                .collect();

            blocks.insert(
                start,
                BasicBlock {
                    start,
                    last_bci,
                    successors,
                    exception_successors,
                },
            );
        }

        Ok(Self { blocks, entry })
    }

    /// The entry block's start bci.
    #[must_use]
    pub fn entry(&self) -> ProgramCounter {
        self.entry
    }

    /// Looks up the block starting at `start`.
    #[must_use]
    pub fn block(&self, start: ProgramCounter) -> Option<&BasicBlock> {
        self.blocks.get(&start)
    }

    /// Iterates over all blocks in bci order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }
}

fn block_covers_any(start: ProgramCounter, last_bci: ProgramCounter, handler: &ExceptionHandler) -> bool {
    handler.covers(start) || handler.covers(last_bci) || (start < handler.start && last_bci >= handler.start)
}

/// Decodes instructions from `start` up to (but not including)
/// `end_exclusive`, returning the bci and terminator shape of the last one.
fn decode_block(
    stream: &mut dyn BytecodeStream,
    start: ProgramCounter,
    end_exclusive: Option<ProgramCounter>,
) -> Result<(ProgramCounter, Terminator), AnalysisError> {
    let mut bci = start;
    let mut wide = false;
    loop {
        let opcode = stream.current_opcode()?;
        if opcode == Opcode::Wide {
            wide = true;
            stream.advance_to(stream.next_bci())?;
            bci = stream.bci();
            continue;
        }
        let terminator = decode_terminator(stream, opcode, wide)?;
        wide = false;
        let next_bci = stream.next_bci();
        let at_end = end_exclusive.is_some_and(|end| next_bci >= end);
        if at_end || opcode.is_block_terminator() {
            let shape = if opcode.is_block_terminator() {
                terminator
            } else {
                Terminator::Fallthrough
            };
            return Ok((bci, shape));
        }
        stream.advance_to(next_bci)?;
        bci = next_bci;
    }
}

/// Decodes the operands of a single instruction and classifies how it
/// transfers control. Non-terminating opcodes still have their operands
/// consumed so the stream ends up positioned at the next instruction.
fn decode_terminator(
    stream: &mut dyn BytecodeStream,
    opcode: Opcode,
    wide: bool,
) -> Result<Terminator, AnalysisError> {
    use Opcode::*;
    match opcode.category() {
        OpcodeCategory::Jump => match opcode {
            Goto => Ok(Terminator::Jump(stream.read_branch_dest(false)?)),
            GotoW => Ok(Terminator::Jump(stream.read_branch_dest(true)?)),
            Jsr | JsrW => {
                let _ = stream.read_branch_dest(opcode == JsrW)?;
                Err(AnalysisError::UnsupportedOpcode {
                    opcode,
                    at: stream.bci(),
                })
            }
            Ret => {
                let _ = stream.read_local_index(wide)?;
                Err(AnalysisError::UnsupportedOpcode {
                    opcode,
                    at: stream.bci(),
                })
            }
            Breakpoint => Err(AnalysisError::UnsupportedOpcode {
                opcode,
                at: stream.bci(),
            }),
            _ => Ok(Terminator::Conditional(stream.read_branch_dest(false)?)),
        },
        OpcodeCategory::Switch => {
            stream.align_switch_padding()?;
            let default = ProgramCounter::from(
                u16::try_from(stream.read_i32()?.max(0)).unwrap_or(u16::MAX),
            );
            let cases = match opcode {
                Tableswitch => {
                    let low = stream.read_i32()?;
                    let high = stream.read_i32()?;
                    let count = (high - low + 1).max(0);
                    (0..count)
                        .map(|_| {
                            stream
                                .read_i32()
                                .map(|v| ProgramCounter::from(u16::try_from(v.max(0)).unwrap_or(u16::MAX)))
                        })
                        .collect::<Result<Vec<_>, _>>()?
                }
                Lookupswitch => {
                    let pairs = stream.read_i32()?.max(0);
                    (0..pairs)
                        .map(|_| {
                            let _match = stream.read_i32()?;
                            stream
                                .read_i32()
                                .map(|v| ProgramCounter::from(u16::try_from(v.max(0)).unwrap_or(u16::MAX)))
                        })
                        .collect::<Result<Vec<_>, _>>()?
                }
                _ => unreachable!("Switch category only covers these two opcodes"),
            };
            Ok(Terminator::Switch { default, cases })
        }
        OpcodeCategory::Return | OpcodeCategory::Throw => Ok(Terminator::Terminal),
        OpcodeCategory::Load | OpcodeCategory::Store => {
            let needs_explicit_index = matches!(
                opcode,
                Iload | Lload | Fload | Dload | Aload | Istore | Lstore | Fstore | Dstore | Astore
            );
            if needs_explicit_index {
                let _ = stream.read_local_index(wide)?;
            }
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::Constant => {
            match opcode {
                Bipush => {
                    let _ = stream.read_u8()?;
                }
                Sipush => {
                    let _ = stream.read_i16()?;
                }
                Ldc => {
                    let _ = stream.read_cp_index(true)?;
                }
                LdcW | Ldc2W => {
                    let _ = stream.read_cp_index(false)?;
                }
                _ => {}
            }
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::Field => {
            let _ = stream.read_cp_index(false)?;
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::Invoke => {
            let _ = stream.read_cp_index(false)?;
            match opcode {
                Invokeinterface => {
                    let _ = stream.read_u8()?;
                    let _ = stream.read_u8()?;
                }
                Invokedynamic => {
                    let _ = stream.read_u8()?;
                    let _ = stream.read_u8()?;
                }
                _ => {}
            }
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::New => {
            match opcode {
                New | Anewarray => {
                    let _ = stream.read_cp_index(false)?;
                }
                Newarray => {
                    let _ = stream.read_u8()?;
                }
                Multianewarray => {
                    let _ = stream.read_cp_index(false)?;
                    let _ = stream.read_u8()?;
                }
                _ => unreachable!("New category only covers these opcodes"),
            }
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::Misc => {
            match opcode {
                Checkcast | Instanceof => {
                    let _ = stream.read_cp_index(false)?;
                }
                Iinc => {
                    let _ = stream.read_local_index(wide)?;
                    let _ = stream.read_increment(wide)?;
                }
                _ => {}
            }
            Ok(Terminator::Fallthrough)
        }
        OpcodeCategory::Binary
        | OpcodeCategory::Unary
        | OpcodeCategory::Cast
        | OpcodeCategory::Compare
        | OpcodeCategory::Array
        | OpcodeCategory::Monitor
        | OpcodeCategory::StackOp => Ok(Terminator::Fallthrough),
    }
}

#[cfg(test)]
mod test {
    use super::*;

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
            Ok(0)
        }

        fn read_i32(&mut self) -> Result<i32, AnalysisError> {
            Ok(0)
        }

        fn read_local_index(&mut self, _wide: bool) -> Result<u16, AnalysisError> {
            Ok(0)
        }

        fn read_increment(&mut self, _wide: bool) -> Result<i32, AnalysisError> {
            Ok(0)
        }

        fn read_branch_dest(&mut self, _wide: bool) -> Result<ProgramCounter, AnalysisError> {
            Ok(ProgramCounter::ZERO)
        }

        fn read_cp_index(&mut self, _narrow: bool) -> Result<crate::common::ConstantPoolIndex, AnalysisError> {
            Ok(crate::common::ConstantPoolIndex::from(0))
        }

        fn align_switch_padding(&mut self) -> Result<(), AnalysisError> {
            Ok(())
        }

        fn advance_to(&mut self, bci: ProgramCounter) -> Result<(), AnalysisError> {
            self.pos = bci.0 as usize;
            Ok(())
        }
    }

    #[test]
    fn single_return_block_has_no_successors() {
        // iconst_0 (3), ireturn (172)
        let mut stream = ScriptedStream::new(vec![3, 172]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let cfg = BlockCfg::build(&mut stream, &leaders, &[]).unwrap();
        let block = cfg.block(ProgramCounter::ZERO).unwrap();
        assert!(block.successors.is_empty());
        assert!(block.exception_successors.is_empty());
    }

    #[test]
    fn goto_jumps_to_its_target() {
        // goto (167) with branch dest stubbed to 0
        let mut stream = ScriptedStream::new(vec![167, 0, 0]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let cfg = BlockCfg::build(&mut stream, &leaders, &[]).unwrap();
        let block = cfg.block(ProgramCounter::ZERO).unwrap();
        assert_eq!(block.successors, vec![ProgramCounter::ZERO]);
    }

    #[test]
    fn exception_handler_covering_block_is_an_edge() {
        let mut stream = ScriptedStream::new(vec![3, 172]);
        let mut leaders = BTreeSet::new();
        leaders.insert(ProgramCounter::ZERO);
        let handlers = vec![ExceptionHandler {
            start: ProgramCounter::ZERO,
            end: ProgramCounter::from(2),
            handler: ProgramCounter::from(10),
            catch_type: None,
        }];
        let cfg = BlockCfg::build(&mut stream, &leaders, &handlers).unwrap();
        let block = cfg.block(ProgramCounter::ZERO).unwrap();
        assert_eq!(block.exception_successors, vec![ProgramCounter::from(10)]);
    }
}
