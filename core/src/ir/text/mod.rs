pub mod err;
pub mod parse;
pub mod print;

pub use err::TextError;
pub use parse::parse_module;
pub use print::InstDisplay;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KilnErrorExt;
    use crate::ir::{Attribute, Linkage, Op, Operand, Type};

    const SAMPLE: &str = r#"
module demo
global @counter : i64 = 0:i64 internal
global @msg : [2 x i8] = x"6869" constant
type Dog { speak = @Dog.speak }

declare @runtime._panic(ptr) -> void noreturn

define @Dog.speak(ptr) -> i64 {
bb0:
  ret 3:i64
}

define internal @main(i64) -> i64 optsize framesize(24) {
bb0:
  %1 : ptr = alloc 16:i64
  %2 : i1 = icmp eq %1, null
  store @counter, $0       ; side effect
  condbr %2, bb1, bb2
bb1:
  call @runtime._panic(@msg)
  unreachable
bb2:
  %3 : iface = iface.make Dog, %1
  %4 : i64 = iface.invoke %3, speak()
  ret %4
}
"#;

    #[test]
    fn parses_headers_and_bodies() {
        let m = parse_module(SAMPLE, "sample.kir").unwrap();
        assert_eq!(m.name, "demo");
        assert_eq!(m.globals.len(), 2);
        assert_eq!(m.globals[0].linkage, Linkage::Internal);
        assert!(m.globals[1].constant);
        assert_eq!(m.types[0].methods.get("speak").map(String::as_str), Some("Dog.speak"));

        let main = m.function(m.named_function("main").unwrap());
        assert_eq!(main.linkage, Linkage::Internal);
        assert!(main.has_attr(Attribute::OptSize));
        assert_eq!(main.frame_size, Some(24));
        assert_eq!(main.params, vec![Type::I64]);
        assert_eq!(main.blocks.len(), 3);

        // void instructions are numbered after the largest explicit id
        let store = &main.blocks[0].insts[2];
        assert!(matches!(store.op, Op::Store { ptr: Operand::Global(_), value: Operand::Arg(0) }));
        assert_eq!(store.id.0, 5);
        assert!(m.function(m.named_function("runtime._panic").unwrap()).is_declaration());
    }

    #[test]
    fn printing_is_a_fixpoint() {
        let m = parse_module(SAMPLE, "sample.kir").unwrap();
        let printed = m.to_string();
        let reparsed = parse_module(&printed, "printed.kir").unwrap();
        assert_eq!(reparsed.to_string(), printed);
        assert_eq!(reparsed.functions.len(), m.functions.len());
    }

    #[test]
    fn syntax_errors_carry_a_location() {
        let err = parse_module("module m\ndefine @f() -> i64 {\nbb0:\n  ret frobnicate\n}\n", "bad.kir").unwrap_err();
        let loc = err.location().unwrap();
        assert_eq!(loc.file, "bad.kir");
        assert_eq!(loc.line, 4);
    }

    #[test]
    fn unknown_symbols_are_rejected() {
        let err = parse_module("module m\ndefine @f() -> void {\nbb0:\n  call @nope()\n  ret\n}\n", "x.kir").unwrap_err();
        assert!(err.message().contains("@nope"));
        assert_eq!(err.location().map(|l| l.line), Some(4));
    }
}
