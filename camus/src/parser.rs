/// Recursive-descent parser for the surface query grammar:
///
/// ```text
/// rule_list   ::= (rule ';')* EOF
/// rule        ::= query ':' action_list
/// action_list ::= call (',' call)*
/// query       ::= or_expr
/// or_expr     ::= and_expr ('||' and_expr)*
/// and_expr    ::= rel_expr ('&&' rel_expr)*
/// rel_expr    ::= [BANG] lhs ('<'|'>'|'=') const
///               | [BANG] lhs '=' const '/' const   -- LPM
/// lhs         ::= field | call
/// call        ::= IDENT '(' [args] ')'
/// field       ::= IDENT '.' IDENT | IDENT        -- bare IDENT = "default.IDENT"
/// const       ::= STRING | NUMBER | IPV4 | IPV6 | MAC
/// ```
use crate::ast::{ActionCall, Arg, ConstLit, Expr, Lhs, RelOp, Rule, RuleList};
use crate::error::{Error, ParserError};
use crate::lexer::{Kind, Lexer, Token};

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    backlog: Vec<Token>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>) -> Self {
        Self {
            lexer,
            backlog: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<RuleList, Error> {
        self.parse_rule_list()
    }

    fn next_token(&mut self) -> Result<Token, Error> {
        if let Some(t) = self.backlog.pop() {
            Ok(t)
        } else {
            Ok(self.lexer.next()?)
        }
    }

    fn peek_token(&mut self) -> Result<Token, Error> {
        let t = self.next_token()?;
        self.backlog.push(t.clone());
        Ok(t)
    }

    fn source_line(&self, line: usize) -> String {
        self.lexer.line_text(line).to_string()
    }

    fn expect(&mut self, expected: Kind) -> Result<Token, Error> {
        let token = self.next_token()?;
        if token.kind != expected {
            return Err(ParserError {
                source: self.source_line(token.line),
                message: format!("found {}, expected {}", token.kind, expected),
                at: token,
            }
            .into());
        }
        Ok(token)
    }

    fn expect_ident(&mut self) -> Result<(String, Token), Error> {
        let token = self.next_token()?;
        match token.kind.clone() {
            Kind::Ident(name) => Ok((name, token)),
            _ => Err(ParserError {
                source: self.source_line(token.line),
                message: format!("found {}, expected an identifier", token.kind),
                at: token,
            }
            .into()),
        }
    }

    fn parse_rule_list(&mut self) -> Result<RuleList, Error> {
        let mut rules = Vec::new();
        loop {
            if self.peek_token()?.kind == Kind::Eof {
                break;
            }
            rules.push(self.parse_rule()?);
            self.expect(Kind::Semicolon)?;
        }
        Ok(RuleList { rules })
    }

    fn parse_rule(&mut self) -> Result<Rule, Error> {
        let query = self.parse_or_expr()?;
        self.expect(Kind::Colon)?;
        let actions = self.parse_action_list()?;
        Ok(Rule { query, actions })
    }

    fn parse_action_list(&mut self) -> Result<Vec<ActionCall>, Error> {
        let mut actions = vec![self.parse_call()?];
        while self.peek_token()?.kind == Kind::Comma {
            self.next_token()?;
            actions.push(self.parse_call()?);
        }
        Ok(actions
            .into_iter()
            .map(|(name, args, at)| ActionCall { name, args, at })
            .collect())
    }

    fn parse_or_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and_expr()?;
        while self.peek_token()?.kind == Kind::LogicalOr {
            self.next_token()?;
            let rhs = self.parse_and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_rel_expr()?;
        while self.peek_token()?.kind == Kind::LogicalAnd {
            self.next_token()?;
            let rhs = self.parse_rel_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_rel_expr(&mut self) -> Result<Expr, Error> {
        let negated = if self.peek_token()?.kind == Kind::Bang {
            self.next_token()?;
            true
        } else {
            false
        };

        let lhs = self.parse_lhs()?;
        let op_tok = self.next_token()?;
        let op = match op_tok.kind {
            Kind::AngleOpen => RelOp::Lt,
            Kind::AngleClose => RelOp::Gt,
            Kind::Equals => RelOp::Eq,
            _ => {
                return Err(ParserError {
                    source: self.source_line(op_tok.line),
                    message: format!(
                        "found {}, expected one of '<', '>', '='",
                        op_tok.kind
                    ),
                    at: op_tok,
                }
                .into())
            }
        };
        let (rhs, _) = self.parse_const()?;

        if op == RelOp::Eq && self.peek_token()?.kind == Kind::Slash {
            self.next_token()?;
            let (prefix_len, _) = self.parse_const()?;
            return Ok(Expr::Lpm {
                negated,
                lhs,
                addr: rhs,
                prefix_len,
                at: op_tok,
            });
        }

        Ok(Expr::Rel {
            negated,
            lhs,
            op,
            rhs,
            at: op_tok,
        })
    }

    fn parse_lhs(&mut self) -> Result<Lhs, Error> {
        let (first, at) = self.expect_ident()?;
        if self.peek_token()?.kind == Kind::ParenOpen {
            let args = self.parse_call_args()?;
            return Ok(Lhs::Call {
                name: first,
                args,
                at,
            });
        }
        if self.peek_token()?.kind == Kind::Dot {
            self.next_token()?;
            let (field, _) = self.expect_ident()?;
            return Ok(Lhs::Field {
                header: first,
                field,
                at,
            });
        }
        Ok(Lhs::Field {
            header: "default".into(),
            field: first,
            at,
        })
    }

    /// Parses a full `IDENT '(' [args] ')'` call, returning its pieces so
    /// both action calls and call-shaped LHSes can share this.
    fn parse_call(&mut self) -> Result<(String, Vec<Arg>, Token), Error> {
        let (name, at) = self.expect_ident()?;
        let args = self.parse_call_args()?;
        Ok((name, args, at))
    }

    fn parse_call_args(&mut self) -> Result<Vec<Arg>, Error> {
        self.expect(Kind::ParenOpen)?;
        let mut args = Vec::new();
        if self.peek_token()?.kind != Kind::ParenClose {
            args.push(self.parse_arg()?);
            while self.peek_token()?.kind == Kind::Comma {
                self.next_token()?;
                args.push(self.parse_arg()?);
            }
        }
        self.expect(Kind::ParenClose)?;
        Ok(args)
    }

    fn parse_arg(&mut self) -> Result<Arg, Error> {
        if let Kind::Ident(_) = self.peek_token()?.kind {
            // An identifier argument names a field (as in `count(pktcount)`)
            // rather than a constant; disambiguated from a bare field
            // reference by appearing inside a call's argument list.
            let (name, _) = self.expect_ident()?;
            return Ok(Arg::Ident(name));
        }
        let (c, _) = self.parse_const()?;
        Ok(Arg::Const(c))
    }

    fn parse_const(&mut self) -> Result<(ConstLit, Token), Error> {
        let token = self.next_token()?;
        let lit = match &token.kind {
            Kind::Number(n) => ConstLit::Number(*n),
            Kind::Ipv4(a) => ConstLit::Ipv4(*a),
            Kind::Ipv6(a, b, c, d) => ConstLit::Ipv6(*a, *b, *c, *d),
            Kind::Mac(m) => ConstLit::Mac(*m),
            Kind::StringLiteral(s) => ConstLit::String(s.clone()),
            _ => {
                return Err(ParserError {
                    source: self.source_line(token.line),
                    message: format!("found {}, expected a constant", token.kind),
                    at: token,
                }
                .into())
            }
        };
        Ok((lit, token))
    }
}
