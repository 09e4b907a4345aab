#![allow(dead_code)]

use ilpatch_file::*;

/// `int Calculator.Add(int a, int b) => a + b;` as the extractor writes it.
pub const ADD_JSON: &str = r#"{
  "Name": "System.Int32 Game.Calculator::Add(System.Int32,System.Int32)",
  "IsStatic": true,
  "Parameters": ["System.Int32", "System.Int32"],
  "ReturnType": "System.Int32",
  "Body": {
    "MaxStackSize": 2,
    "Variables": ["System.Int32"],
    "Instructions": {
      "0": { "Code": "Nop", "OperandType": 0, "Operand": null, "NextOffset": 1 },
      "1": { "Code": "Ldarg_0", "OperandType": 0, "Operand": null, "NextOffset": 2 },
      "2": { "Code": "Ldarg_1", "OperandType": 0, "Operand": null, "NextOffset": 3 },
      "3": { "Code": "Add", "OperandType": 0, "Operand": null, "NextOffset": 4 },
      "4": { "Code": "Stloc_0", "OperandType": 0, "Operand": null, "NextOffset": 5 },
      "5": { "Code": "Br_S", "OperandType": 6, "Operand": 7, "NextOffset": 7 },
      "7": { "Code": "Ldloc_0", "OperandType": 0, "Operand": null, "NextOffset": 8 },
      "8": { "Code": "Ret", "OperandType": 0, "Operand": null }
    }
  }
}"#;

/// A static method body from `(offset, instruction)` pairs.
pub fn body(instructions: Vec<(u32, Instruction)>) -> MethodBody {
    MethodBody {
        max_stack_size: 8,
        variables: Vec::new(),
        instructions: instructions.into_iter().collect(),
    }
}

pub fn op(opcode: Opcode, next: u32) -> Instruction {
    Instruction::simple(opcode, Some(next))
}

pub fn op_with(opcode: Opcode, operand: Operand, next: u32) -> Instruction {
    Instruction::new(opcode, operand, Some(next))
}

pub fn ret() -> Instruction {
    Instruction::simple(Opcode::Ret, None)
}
