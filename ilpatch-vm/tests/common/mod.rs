#![allow(dead_code)]

use std::sync::Arc;

use ilpatch_file::{Instruction, MethodBody, MethodDescriptor, Opcode, Operand, Signature, TypeName};
use ilpatch_vm::{Catalogue, Engine, Module, ObjectRef, Result, TypeDef, Value, corelib};

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

pub fn ty(text: &str) -> TypeName {
    TypeName::parse(text).unwrap()
}

pub fn sig(text: &str) -> Signature {
    Signature::parse(text).unwrap()
}

pub fn add_method() -> MethodDescriptor {
    MethodDescriptor::from_json(ADD_JSON).unwrap()
}

/// An instruction with no operand.
pub fn i(opcode: Opcode) -> (Opcode, Operand) {
    (opcode, Operand::None)
}

pub fn int(opcode: Opcode, n: i64) -> (Opcode, Operand) {
    (opcode, Operand::Int(n))
}

pub fn to(opcode: Opcode, target: u32) -> (Opcode, Operand) {
    (opcode, Operand::Target(target))
}

pub fn call(opcode: Opcode, method: &str) -> (Opcode, Operand) {
    (opcode, Operand::Method(method.to_string()))
}

pub fn field(opcode: Opcode, field: &str) -> (Opcode, Operand) {
    (opcode, Operand::Field(field.to_string()))
}

pub fn ldstr(text: &str) -> (Opcode, Operand) {
    (Opcode::Ldstr, Operand::String(text.to_string()))
}

/// A body laid out one instruction per offset, each falling through to the
/// next.
pub fn body(variables: &[&str], code: Vec<(Opcode, Operand)>) -> MethodBody {
    let last = code.len().saturating_sub(1);
    let instructions = code
        .into_iter()
        .enumerate()
        .map(|(offset, (opcode, operand))| {
            let next = (offset < last).then(|| offset as u32 + 1);
            (offset as u32, Instruction::new(opcode, operand, next))
        })
        .collect();
    MethodBody {
        max_stack_size: 8,
        variables: variables.iter().map(|v| ty(v)).collect(),
        instructions,
    }
}

pub fn method(
    name: &str,
    is_static: bool,
    parameters: &[&str],
    return_type: &str,
    body: MethodBody,
) -> MethodDescriptor {
    MethodDescriptor {
        name: sig(name),
        is_static,
        parameters: parameters.iter().map(|p| ty(p)).collect(),
        return_type: ty(return_type),
        body,
    }
}

/// `static int Calc.Inc(int x) => x + 1;`
pub fn inc_method() -> MethodDescriptor {
    method(
        "Game.Calc::Inc(System.Int32)",
        true,
        &["System.Int32"],
        "System.Int32",
        body(
            &[],
            vec![i(Opcode::Ldarg0), i(Opcode::LdcI41), i(Opcode::Add), i(Opcode::Ret)],
        ),
    )
}

/// Host symbols of the sample game.
pub fn game_module() -> Module {
    let object = TypeName::named("System.Object");
    let mut m = Module::new("Game");
    m.add_type(TypeDef::class("Game.Player").with_base(object.clone()))
        .add_type(TypeDef::class("Game.Arena").with_base(object.clone()))
        .add_type(TypeDef::class("Game.Config"))
        .add_type(TypeDef::class("Game.Box`1").with_base(object))
        .add_type(TypeDef::structure("Game.Point"));
    m.static_method("System.Int32 Game.Native::Twice(System.Int32)", |call| {
        let inc = Signature::parse("Game.Calc::Inc(System.Int32)")?;
        let once = call.invoke(&inc, None, vec![call.arg(0)?.clone()])?;
        call.invoke(&inc, None, vec![once])
    })
    .unwrap()
    .instance_method("System.String Game.Player::get_Name()", |call| {
        let player: ObjectRef = call.this_as()?;
        Ok(player.field("name").unwrap_or_default())
    })
    .unwrap()
    .field("System.Int32 Game.Config::level", true, |_| Ok(Value::I32(3)), None)
    .unwrap();
    m
}

pub fn engine(methods: Vec<MethodDescriptor>) -> Arc<Engine> {
    let mut builder = Catalogue::builder();
    for descriptor in methods {
        builder.insert(descriptor).unwrap();
    }
    let mut symbols = corelib::symbol_table().unwrap();
    symbols.register(game_module());
    Arc::new(Engine::new(builder.finish(), symbols))
}

pub fn run(engine: &Engine, signature: &str, args: Vec<Value>) -> Result<Value> {
    engine.invoke(&sig(signature), None, args)
}
