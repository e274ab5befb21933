//! Tokenizes and compiles RPN source into a flat op list (§4.5 `compile`).
//! The grammar is postfix: operands (literals, `#N` register references)
//! push values; bareword operators pop their arguments off the stack. A
//! `field "name"` pair is just the string literal "name" followed by the
//! `field` operator, like any other operator taking a literal operand.
use crate::err::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
	PushDouble(f64),
	PushLong(i64),
	PushString(String),
	PushReg(u8),
	Add,
	Sub,
	Mul,
	Div,
	Neg,
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	StrEq,
	StrContains,
	Field,
	SetUnion,
	SetHasMember,
	HasAncestor,
	HasDescendant,
	And,
	Or,
	Not,
}

/// An opaque compiled expression (§4.5 `compile(source) -> expression`).
#[derive(Debug, Clone, PartialEq)]
pub struct Expr(pub(super) Vec<Op>);

pub fn compile(source: &str) -> Result<Expr, Error> {
	let mut ops = Vec::new();
	for (position, token) in Tokenizer::new(source).enumerate() {
		let token = token?;
		ops.push(token_to_op(&token, position)?);
	}
	Ok(Expr(ops))
}

#[derive(Debug, Clone, PartialEq)]
enum RawToken {
	Double(f64),
	Long(i64),
	String(String),
	Reg(u8),
	Word(String),
}

struct Tokenizer<'a> {
	rest: std::str::Chars<'a>,
	source: &'a str,
	offset: usize,
}

impl<'a> Tokenizer<'a> {
	fn new(source: &'a str) -> Self {
		Self {
			rest: source.chars(),
			source,
			offset: 0,
		}
	}
}

impl<'a> Iterator for Tokenizer<'a> {
	type Item = Result<RawToken, Error>;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let remaining = self.rest.as_str();
			let mut chars = remaining.char_indices().peekable();
			let (start, c) = match chars.next() {
				None => return None,
				Some(pair) => pair,
			};
			if c.is_whitespace() {
				self.rest = remaining[start + c.len_utf8()..].chars();
				continue;
			}
			if c == '"' {
				let mut end = start + 1;
				let mut buf = String::new();
				let bytes = remaining.as_bytes();
				loop {
					if end >= bytes.len() {
						return Some(Err(Error::CompileError {
							position: Some(self.offset),
							message: "unterminated string literal".into(),
						}));
					}
					let ch = remaining[end..].chars().next().unwrap();
					if ch == '"' {
						end += 1;
						break;
					}
					buf.push(ch);
					end += ch.len_utf8();
				}
				self.rest = remaining[end..].chars();
				self.offset += 1;
				return Some(Ok(RawToken::String(buf)));
			}
			let end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
			let word = &remaining[..end];
			self.rest = remaining[end..].chars();
			self.offset += 1;
			if let Some(reg) = word.strip_prefix('#') {
				return Some(match reg.parse::<u8>() {
					Ok(n) => Ok(RawToken::Reg(n)),
					Err(_) => Err(Error::CompileError {
						position: Some(self.offset),
						message: format!("invalid register reference: {word}"),
					}),
				});
			}
			if let Ok(n) = word.parse::<i64>() {
				return Some(Ok(RawToken::Long(n)));
			}
			if let Ok(n) = word.parse::<f64>() {
				return Some(Ok(RawToken::Double(n)));
			}
			return Some(Ok(RawToken::Word(word.to_string())));
		}
	}
}

fn token_to_op(token: &RawToken, position: usize) -> Result<Op, Error> {
	Ok(match token {
		RawToken::Double(v) => Op::PushDouble(*v),
		RawToken::Long(v) => Op::PushLong(*v),
		RawToken::String(s) => Op::PushString(s.clone()),
		RawToken::Reg(n) => Op::PushReg(*n),
		RawToken::Word(w) => match w.as_str() {
			"+" => Op::Add,
			"-" => Op::Sub,
			"*" => Op::Mul,
			"/" => Op::Div,
			"neg" => Op::Neg,
			"=" => Op::Eq,
			"!=" => Op::Ne,
			"<" => Op::Lt,
			"<=" => Op::Le,
			">" => Op::Gt,
			">=" => Op::Ge,
			"seq" => Op::StrEq,
			"scontains" => Op::StrContains,
			"field" => Op::Field,
			"union" => Op::SetUnion,
			"has" => Op::SetHasMember,
			"ancestor" => Op::HasAncestor,
			"descendant" => Op::HasDescendant,
			"and" => Op::And,
			"or" => Op::Or,
			"not" => Op::Not,
			other => {
				return Err(Error::CompileError {
					position: Some(position),
					message: format!("unsupported rpn operator: {other}"),
				})
			}
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compiles_arithmetic() {
		let expr = compile("#0 1 +").unwrap();
		assert_eq!(expr.0, vec![Op::PushReg(0), Op::PushLong(1), Op::Add]);
	}

	#[test]
	fn compiles_field_fetch() {
		let expr = compile(r#""score" field"#).unwrap();
		assert_eq!(expr.0, vec![Op::PushString("score".into()), Op::Field]);
	}

	#[test]
	fn rejects_unknown_operator() {
		assert!(matches!(compile("bogus"), Err(Error::CompileError { .. })));
	}

	#[test]
	fn rejects_unterminated_string() {
		assert!(matches!(compile(r#""oops"#), Err(Error::CompileError { .. })));
	}
}
