mod common;

use common::*;
use ilpatch_file::{Opcode, Operand, TypeName};
use ilpatch_vm::{CallSite, Error, Object, Redirector, Value};

fn player(health: i32) -> Value {
    let obj = Object::new(TypeName::named("Game.Player"));
    obj.set_field("health", Value::I32(health));
    Value::object(obj)
}

#[test]
fn patched_calls_patched() {
    let run_inc = method(
        "Game.Calc::Run(System.Int32)",
        true,
        &["System.Int32"],
        "System.Int32",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                call(Opcode::Call, "System.Int32 Game.Calc::Inc(System.Int32)"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![inc_method(), run_inc]);
    let result = run(&engine, "Game.Calc::Run(System.Int32)", vec![Value::I32(41)]).unwrap();
    assert_eq!(result, Value::I32(42));
}

#[test]
fn interpreted_native_interpreted_chain() {
    // Run calls the host's Twice, which calls the patched Inc twice.
    let run_twice = method(
        "Game.Calc::Run(System.Int32)",
        true,
        &["System.Int32"],
        "System.Int32",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                call(Opcode::Call, "System.Int32 Game.Native::Twice(System.Int32)"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![inc_method(), run_twice]);
    let result = run(&engine, "Game.Calc::Run(System.Int32)", vec![Value::I32(5)]).unwrap();
    assert_eq!(result, Value::I32(7));
}

#[test]
fn unresolved_callee() {
    let lost = method(
        "Game.Calc::Lost()",
        true,
        &[],
        "System.Void",
        body(
            &[],
            vec![call(Opcode::Call, "System.Void Game.Nowhere::Run()"), i(Opcode::Ret)],
        ),
    );
    let engine = engine(vec![lost]);
    let err = run(&engine, "Game.Calc::Lost()", vec![]).unwrap_err();
    assert!(
        matches!(err, Error::Resolution(ref name) if name == "Game.Nowhere::Run()"),
        "expected Resolution, got {err}"
    );
}

#[test]
fn type_placeholders_bind_per_instantiation() {
    // static T Box<T>.Default() { T local = default; return local; }
    let default = method(
        "Game.Box`1<!0>::Default()",
        true,
        &[],
        "!0",
        body(&["!0"], vec![i(Opcode::Ldloc0), i(Opcode::Ret)]),
    );
    let engine = engine(vec![default]);
    let int = run(&engine, "Game.Box`1<System.Int32>::Default()", vec![]).unwrap();
    assert_eq!(int, Value::I32(0));
    let text = run(&engine, "Game.Box`1<System.String>::Default()", vec![]).unwrap();
    assert_eq!(text, Value::Null);
}

#[test]
fn type_token_of_a_placeholder() {
    let kind = method(
        "Game.Box`1<!0>::Kind()",
        true,
        &[],
        "System.RuntimeTypeHandle",
        body(
            &[],
            vec![(Opcode::Ldtoken, Operand::Token("!0".into())), i(Opcode::Ret)],
        ),
    );
    let engine = engine(vec![kind]);
    let result = run(&engine, "Game.Box`1<System.Double>::Kind()", vec![]).unwrap();
    assert!(
        matches!(result, Value::Type(ref ty) if ty.to_string() == "System.Double"),
        "expected the closed type, got {result:?}"
    );
}

#[test]
fn generic_method_called_from_a_patched_body() {
    let identity = method(
        "Game.Util::Identity<!!0>(!!0)",
        true,
        &["!!0"],
        "!!0",
        body(&[], vec![i(Opcode::Ldarg0), i(Opcode::Ret)]),
    );
    let caller = method(
        "Game.Util::Echo()",
        true,
        &[],
        "System.String",
        body(
            &[],
            vec![
                ldstr("echo"),
                call(Opcode::Call, "!!0 Game.Util::Identity<System.String>(!!0)"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![identity, caller]);
    let result = run(&engine, "Game.Util::Echo()", vec![]).unwrap();
    assert_eq!(result.as_str(), Some("echo"));
}

#[test]
fn delegate_over_a_patched_method() {
    // Func<int, int> f = Inc; return f(f(x));
    let func = "System.Func`2<System.Int32,System.Int32>";
    let apply = method(
        "Game.Calc::ApplyTwice(System.Int32)",
        true,
        &["System.Int32"],
        "System.Int32",
        body(
            &[func],
            vec![
                i(Opcode::Ldnull),
                call(Opcode::Ldftn, "System.Int32 Game.Calc::Inc(System.Int32)"),
                call(
                    Opcode::Newobj,
                    &format!("System.Void {func}::.ctor(System.Object,System.IntPtr)"),
                ),
                i(Opcode::Stloc0),
                i(Opcode::Ldloc0),
                i(Opcode::Ldloc0),
                i(Opcode::Ldarg0),
                call(Opcode::Callvirt, &format!("!1 {func}::Invoke(!0)")),
                call(Opcode::Callvirt, &format!("!1 {func}::Invoke(!0)")),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![inc_method(), apply]);
    let result = run(&engine, "Game.Calc::ApplyTwice(System.Int32)", vec![Value::I32(1)]).unwrap();
    assert_eq!(result, Value::I32(3));
}

#[test]
fn newobj_runs_a_patched_constructor() {
    let ctor = method(
        "Game.Player::.ctor(System.Int32)",
        false,
        &["System.Int32"],
        "System.Void",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                call(Opcode::Call, "System.Void System.Object::.ctor()"),
                i(Opcode::Ldarg0),
                i(Opcode::Ldarg1),
                field(Opcode::Stfld, "System.Int32 Game.Player::health"),
                i(Opcode::Ret),
            ],
        ),
    );
    // var p = new Player(hp); p.health -= 10; return p;
    let spawn = method(
        "Game.Arena::Spawn(System.Int32)",
        true,
        &["System.Int32"],
        "Game.Player",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                call(Opcode::Newobj, "System.Void Game.Player::.ctor(System.Int32)"),
                i(Opcode::Dup),
                i(Opcode::Dup),
                field(Opcode::Ldfld, "System.Int32 Game.Player::health"),
                int(Opcode::LdcI4S, 10),
                i(Opcode::Sub),
                field(Opcode::Stfld, "System.Int32 Game.Player::health"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![ctor, spawn]);
    let result = run(&engine, "Game.Arena::Spawn(System.Int32)", vec![Value::I32(100)]).unwrap();
    let obj = result.as_object().expect("an object");
    assert_eq!(obj.class().to_string(), "Game.Player");
    assert_eq!(obj.field("health"), Some(Value::I32(90)));
}

#[test]
fn stored_static_field_persists_across_calls() {
    let count = method(
        "Game.Arena::Next()",
        true,
        &[],
        "System.Int32",
        body(
            &[],
            vec![
                field(Opcode::Ldsfld, "System.Int32 Game.Arena::count"),
                i(Opcode::LdcI41),
                i(Opcode::Add),
                i(Opcode::Dup),
                field(Opcode::Stsfld, "System.Int32 Game.Arena::count"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![count]);
    assert_eq!(run(&engine, "Game.Arena::Next()", vec![]).unwrap(), Value::I32(1));
    assert_eq!(run(&engine, "Game.Arena::Next()", vec![]).unwrap(), Value::I32(2));
}

#[test]
fn registered_static_field_accessor() {
    let read = method(
        "Game.Config::Level()",
        true,
        &[],
        "System.Int32",
        body(
            &[],
            vec![field(Opcode::Ldsfld, "System.Int32 Game.Config::level"), i(Opcode::Ret)],
        ),
    );
    let write = method(
        "Game.Config::Reset()",
        true,
        &[],
        "System.Void",
        body(
            &[],
            vec![
                i(Opcode::LdcI40),
                field(Opcode::Stsfld, "System.Int32 Game.Config::level"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![read, write]);
    assert_eq!(run(&engine, "Game.Config::Level()", vec![]).unwrap(), Value::I32(3));
    let err = run(&engine, "Game.Config::Reset()", vec![]).unwrap_err();
    assert!(matches!(err, Error::Native(_)), "expected Native, got {err}");
}

#[test]
fn host_instance_method_receives_its_receiver() {
    let name_of = method(
        "Game.Arena::NameOf(Game.Player)",
        true,
        &["Game.Player"],
        "System.String",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                call(Opcode::Callvirt, "System.String Game.Player::get_Name()"),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![name_of]);
    let ada = player(100);
    ada.as_object().unwrap().set_field("name", Value::str("Ada"));
    let result = run(&engine, "Game.Arena::NameOf(Game.Player)", vec![ada]).unwrap();
    assert_eq!(result.as_str(), Some("Ada"));
}

#[test]
fn isinst_and_null_test() {
    // return o is Player;
    let is_player = method(
        "Game.Arena::IsPlayer(System.Object)",
        true,
        &["System.Object"],
        "System.Boolean",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                (Opcode::Isinst, Operand::Type("Game.Player".into())),
                i(Opcode::Ldnull),
                i(Opcode::CgtUn),
                i(Opcode::Ret),
            ],
        ),
    );
    let engine = engine(vec![is_player]);
    let check = |v: Value| run(&engine, "Game.Arena::IsPlayer(System.Object)", vec![v]).unwrap();
    assert_eq!(check(player(1)), Value::I32(1));
    assert_eq!(check(Value::str("not a player")), Value::I32(0));
    assert_eq!(check(Value::Null), Value::I32(0));
}

#[test]
fn redirector_runs_patched_instance_method() {
    // void Player.Damage(int amount) { health -= amount; }
    let damage = method(
        "Game.Player::Damage(System.Int32)",
        false,
        &["System.Int32"],
        "System.Void",
        body(
            &[],
            vec![
                i(Opcode::Ldarg0),
                i(Opcode::Ldarg0),
                field(Opcode::Ldfld, "System.Int32 Game.Player::health"),
                i(Opcode::Ldarg1),
                i(Opcode::Sub),
                field(Opcode::Stfld, "System.Int32 Game.Player::health"),
                i(Opcode::Ret),
            ],
        ),
    );
    let redirector = Redirector::new(engine(vec![damage]));
    let site = CallSite::new(
        TypeName::named("Game.Player"),
        "Damage",
        vec![TypeName::named("System.Int32")],
    );
    assert!(redirector.is_patched(&site));

    let target = player(100);
    redirector
        .invoke_void(&site, Some(target.clone()), vec![Value::I32(30)])
        .unwrap();
    assert_eq!(target.as_object().unwrap().field("health"), Some(Value::I32(70)));
}

#[test]
fn redirector_returns_typed_results() {
    let redirector = Redirector::new(engine(vec![add_method()]));
    let site = CallSite::parse("Game.Calculator::Add(System.Int32,System.Int32)").unwrap();
    let sum: i32 = redirector
        .invoke(&site, None, vec![Value::I32(3), Value::I32(4)])
        .unwrap();
    assert_eq!(sum, 7);
}

#[test]
fn redirector_without_descriptor() {
    let redirector = Redirector::new(engine(vec![add_method()]));
    let site = CallSite::parse("Game.Calculator::Mul(System.Int32,System.Int32)").unwrap();
    assert!(!redirector.is_patched(&site));
    let err = redirector
        .invoke::<i32>(&site, None, vec![Value::I32(3), Value::I32(4)])
        .unwrap_err();
    assert!(
        matches!(err, Error::MissingDescriptor(_)),
        "expected MissingDescriptor, got {err}"
    );
}
