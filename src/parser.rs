use crate::ast::{
    BinaryOp, Declaration, Expr, ForwardDecl, FunctionDef, GlobalDecl, Literal, Program, Stmt,
    StructDef, TypeTag, UnaryOp,
};
use crate::error::{Span, SyntaxError};
use crate::lexer::{Token, TokenKind};
use serde::{Deserialize, Serialize};

type ParseResult<T> = Result<T, SyntaxError>;

/// Keywords that begin a statement.
const STATEMENT_KEYWORDS: &[&str] = &[
    "display", "set", "call", "if", "for", "while", "create", "destroy", "return", "exit",
    "define", "increment", "decrement",
];

/// Keywords that close a statement list.
const BLOCK_END_KEYWORDS: &[&str] = &[
    "else", "endif", "endfor", "endwhile", "endfun", "function", "implementations",
];

/// Keywords that open a top-level section.
const SECTION_KEYWORDS: &[&str] = &[
    "import", "symbol", "forward", "specifications", "global", "implementations", "function",
];

/// What the parse stage hands on: the tree plus every syntax error found.
/// This is also the shape of the AST interchange file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOutput {
    pub program: Program,
    pub errors: Vec<SyntaxError>,
}

impl ParseOutput {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Program, Vec<SyntaxError>> {
        if self.errors.is_empty() {
            Ok(self.program)
        } else {
            Err(self.errors)
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map_or(true, |token| token.kind != TokenKind::Eof) {
            let (line, column) = tokens
                .last()
                .map_or((1, 1), |token| (token.line, token.column + token.lexeme.chars().count()));
            tokens.push(Token::eof(line, column));
        }

        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
        }
    }

    pub fn parse(mut self) -> ParseOutput {
        let program = self.program();
        tracing::debug!(
            functions = program.functions.len(),
            structs = program.structs.len(),
            errors = self.errors.len(),
            "parse finished"
        );

        ParseOutput {
            program,
            errors: self.errors,
        }
    }

    // ------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------

    fn program(&mut self) -> Program {
        let mut program = Program::default();

        loop {
            let outcome = if self.check_kw("import") {
                self.import(&mut program)
            } else if self.check_kw("symbol") {
                self.symbol(&mut program)
            } else if self.check_kw("forward") {
                self.forward_declarations(&mut program)
            } else if self.check_kw("specifications") {
                self.specifications(&mut program);
                Ok(())
            } else if self.check_kw("global") {
                self.global_declarations(&mut program)
            } else if self.match_kw("implementations") {
                break;
            } else if self.check_kw("function") {
                self.record(SyntaxError::with_help(
                    self.peek().span(),
                    "Expected 'implementations' before function definitions",
                    "Function definitions follow the 'implementations' keyword.",
                ));
                break;
            } else if self.is_at_end() {
                self.record(SyntaxError::new(
                    self.peek().span(),
                    "Expected 'implementations' section",
                ));
                return program;
            } else {
                let token = self.advance().clone();
                Err(SyntaxError::with_help(
                    token.span(),
                    format!("Unexpected {} at top level", token.describe()),
                    "A program consists of import, symbol, forward, specifications, global and implementations sections.",
                ))
            };

            if let Err(error) = outcome {
                self.record(error);
                self.synchronize_section();
            }
        }

        self.implementations(&mut program);
        program
    }

    fn import(&mut self, program: &mut Program) -> ParseResult<()> {
        self.advance();
        let token = self.peek().clone();
        if token.kind != TokenKind::StringLiteral {
            return Err(SyntaxError::new(
                token.span(),
                format!("Expected file name string after 'import', found {}", token.describe()),
            ));
        }
        self.advance();
        tracing::debug!(file = %token.lexeme, "parsed import");
        program.imports.push(token.lexeme);
        Ok(())
    }

    fn symbol(&mut self, program: &mut Program) -> ParseResult<()> {
        let start = self.advance().span();
        let name = self.expect_identifier("symbol name")?;
        let value = self.expression()?;
        let ty = literal_type(&value).ok_or_else(|| {
            SyntaxError::with_help(
                value.span(),
                format!("Symbol '{}' must be bound to a literal", name.lexeme),
                "Example: symbol MAX 10",
            )
        })?;

        program.globals.push(GlobalDecl {
            name: name.lexeme,
            ty,
            init: Some(value),
            constant: true,
            span: start,
        });
        Ok(())
    }

    fn forward_declarations(&mut self, program: &mut Program) -> ParseResult<()> {
        self.advance();
        self.match_kw("declarations");
        tracing::debug!("parsing forward declarations");

        while self.check_kw("function") {
            match self.function_header() {
                Ok((name, return_type, params)) => {
                    program.forwards.push(ForwardDecl {
                        span: name.span(),
                        name: name.lexeme,
                        return_type,
                        params,
                    });
                    self.match_symbol(";");
                }
                Err(error) => {
                    // Stops at the next header or section
                    self.record(error);
                    self.synchronize_section();
                }
            }
        }
        Ok(())
    }

    fn specifications(&mut self, program: &mut Program) {
        self.advance();
        tracing::debug!("parsing specifications");

        while self.check_kw("struct") {
            match self.struct_definition() {
                Ok(def) => program.structs.push(def),
                Err(error) => {
                    self.record(error);
                    // Resume at the next struct or section
                    while !self.is_at_end() && !self.check_kw("struct") && !self.at_section_start() {
                        self.advance();
                    }
                }
            }
        }
    }

    fn struct_definition(&mut self) -> ParseResult<StructDef> {
        self.advance();
        let name = self.expect_identifier("struct name")?;
        self.expect_kw("is", &format!("Expected 'is' after struct name '{}'", name.lexeme))?;

        let mut fields = Vec::new();
        while self.check_kw("define") {
            fields.push(self.define()?);
        }

        self.expect_kw(
            "endstruct",
            &format!("Expected 'endstruct' to close struct '{}'", name.lexeme),
        )?;
        if self.peek().kind == TokenKind::Identifier {
            let end_name = self.advance().clone();
            if end_name.lexeme != name.lexeme {
                self.record(SyntaxError::new(
                    end_name.span(),
                    format!(
                        "Struct name mismatch: started with '{}', ended with '{}'",
                        name.lexeme, end_name.lexeme
                    ),
                ));
            }
        }
        self.match_symbol(";");

        Ok(StructDef {
            span: name.span(),
            name: name.lexeme,
            fields,
        })
    }

    fn global_declarations(&mut self, program: &mut Program) -> ParseResult<()> {
        self.advance();
        self.match_kw("declarations");
        tracing::debug!("parsing global declarations");

        loop {
            if self.match_kw("constants") {
                while self.check_kw("define") {
                    program.globals.push(self.constant_definition()?);
                }
            } else if self.match_kw("variables") {
                while self.check_kw("define") {
                    let declaration = self.define()?;
                    program.globals.push(GlobalDecl {
                        name: declaration.name,
                        ty: declaration.ty,
                        init: None,
                        constant: false,
                        span: declaration.span,
                    });
                }
            } else {
                return Ok(());
            }
        }
    }

    fn constant_definition(&mut self) -> ParseResult<GlobalDecl> {
        self.advance();
        let name = self.expect_identifier("constant name")?;
        self.expect_symbol("=", &format!("Expected '=' after constant '{}'", name.lexeme))?;
        let value = self.expression()?;
        self.expect_kw("of", "Expected 'of type' after constant value")?;
        self.expect_kw("type", "Expected 'type' after 'of'")?;
        let ty = self.base_type()?;
        self.match_symbol(";");

        Ok(GlobalDecl {
            span: name.span(),
            name: name.lexeme,
            ty,
            init: Some(value),
            constant: true,
        })
    }

    fn implementations(&mut self, program: &mut Program) {
        tracing::debug!("parsing implementations");

        while !self.is_at_end() {
            if !self.check_kw("function") {
                let token = self.advance().clone();
                self.record(SyntaxError::with_help(
                    token.span(),
                    format!("Expected 'function', found {}", token.describe()),
                    "Only function definitions may appear in the implementations section.",
                ));
                self.synchronize_function();
                continue;
            }

            match self.function() {
                Ok(function) => program.functions.push(function),
                Err(error) => {
                    self.record(error);
                    self.synchronize_function();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Functions and declarations
    // ------------------------------------------------------------------

    fn function(&mut self) -> ParseResult<FunctionDef> {
        let (name, return_type, params) = self.function_header()?;
        tracing::debug!(function = %name.lexeme, "parsing function");

        self.expect_kw(
            "is",
            &format!("Expected 'is' after the header of function '{}'", name.lexeme),
        )?;

        let mut locals = Vec::new();
        if self.match_kw("variables") {
            while self.check_kw("define") {
                locals.push(self.define()?);
            }
        }

        self.expect_kw(
            "begin",
            &format!("Expected 'begin' before the body of function '{}'", name.lexeme),
        )?;

        let mut body = Vec::new();
        loop {
            body.extend(self.statement_list());
            if self.at_stray_block_end() {
                let token = self.advance().clone();
                self.record(SyntaxError::new(
                    token.span(),
                    format!("Unexpected {} in body of function '{}'", token.describe(), name.lexeme),
                ));
            } else {
                break;
            }
        }

        if self.match_kw("endfun") {
            if self.peek().kind == TokenKind::Identifier {
                let end_name = self.advance().clone();
                if end_name.lexeme != name.lexeme {
                    self.record(SyntaxError::new(
                        end_name.span(),
                        format!(
                            "Function name mismatch: started with '{}', ended with '{}'",
                            name.lexeme, end_name.lexeme
                        ),
                    ));
                }
            } else {
                self.record(SyntaxError::new(
                    self.peek().span(),
                    format!("Expected function name '{}' after 'endfun'", name.lexeme),
                ));
            }
            self.match_symbol(";");
        } else {
            // Keep the function; the next header is still parsed normally.
            self.record(SyntaxError::with_help(
                self.peek().span(),
                format!(
                    "Expected 'endfun {}' to close function '{}', found {}",
                    name.lexeme,
                    name.lexeme,
                    self.peek().describe()
                ),
                "Every function body must end with 'endfun <name>'.",
            ));
        }

        Ok(FunctionDef {
            span: name.span(),
            name: name.lexeme,
            return_type,
            params,
            locals,
            body,
        })
    }

    fn function_header(&mut self) -> ParseResult<(Token, Option<TypeTag>, Vec<Declaration>)> {
        self.expect_kw("function", "Expected 'function'")?;
        let name = self.expect_identifier("function name")?;

        let return_type = if self.check_kw("return") {
            self.advance();
            self.expect_kw("type", "Expected 'type' after 'return'")?;
            if self.match_kw("void") {
                None
            } else if self.match_kw("pointer") {
                self.expect_kw("of", "Expected 'of type' after 'pointer'")?;
                self.expect_kw("type", "Expected 'type' after 'of'")?;
                Some(TypeTag::pointer_to(self.base_type()?))
            } else {
                Some(self.base_type()?)
            }
        } else {
            None
        };

        let mut params = Vec::new();
        if self.match_kw("parameters") {
            loop {
                let param = self.expect_identifier("parameter name")?;
                let ty = self.type_spec()?;
                params.push(Declaration {
                    span: param.span(),
                    name: param.lexeme,
                    ty,
                });
                if !self.match_symbol(",") {
                    break;
                }
            }
        }

        Ok((name, return_type, params))
    }

    /// `define NAME typespec`
    fn define(&mut self) -> ParseResult<Declaration> {
        self.expect_kw("define", "Expected 'define'")?;
        let name = self.expect_identifier("variable name")?;
        let ty = self.type_spec()?;
        self.match_symbol(";");

        Ok(Declaration {
            span: name.span(),
            name: name.lexeme,
            ty,
        })
    }

    /// `[pointer | array[N]] of type base`
    fn type_spec(&mut self) -> ParseResult<TypeTag> {
        let wrapper = if self.match_kw("pointer") {
            Some(None)
        } else if self.match_kw("array") {
            self.expect_symbol("[", "Expected '[' after 'array'")?;
            let length_token = self.peek().clone();
            if length_token.kind != TokenKind::IntLiteral {
                return Err(SyntaxError::with_help(
                    length_token.span(),
                    format!("Expected array length, found {}", length_token.describe()),
                    "Array declarations need a constant size: array[10] of type integer",
                ));
            }
            self.advance();
            let length = length_token.lexeme.parse::<usize>().map_err(|_| {
                SyntaxError::new(length_token.span(), "Invalid array length")
            })?;
            self.expect_symbol("]", "Expected ']' after array length")?;
            Some(Some(length))
        } else {
            None
        };

        self.expect_kw("of", "Expected 'of type' in declaration")?;
        self.expect_kw("type", "Expected 'type' after 'of'")?;
        let base = self.base_type()?;

        Ok(match wrapper {
            None => base,
            Some(None) => TypeTag::pointer_to(base),
            Some(Some(length)) => TypeTag::array_of(base, length),
        })
    }

    fn base_type(&mut self) -> ParseResult<TypeTag> {
        let token = self.peek().clone();
        let ty = match token.kind {
            TokenKind::Identifier => TypeTag::Struct {
                name: token.lexeme.clone(),
            },
            TokenKind::Keyword => match token.lexeme.to_ascii_lowercase().as_str() {
                "integer" | "byte" => TypeTag::Integer,
                "double" | "float" => TypeTag::Double,
                "char" | "string" => TypeTag::Text,
                "boolean" => TypeTag::Boolean,
                _ => return Err(self.type_error(&token)),
            },
            _ => return Err(self.type_error(&token)),
        };
        self.advance();
        Ok(ty)
    }

    fn type_error(&self, token: &Token) -> SyntaxError {
        SyntaxError::with_help(
            token.span(),
            format!("Expected type, found {}", token.describe()),
            "Valid types are integer, byte, double, float, char, string, boolean or a struct name.",
        )
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse statements until a block closer. Errors are recorded and the
    /// parser resynchronizes at the next statement keyword.
    fn statement_list(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();

        while !self.is_at_end() && !self.at_block_end() {
            if !self.at_statement_start() {
                let token = self.advance().clone();
                self.record(SyntaxError::with_help(
                    token.span(),
                    format!("Expected statement, found {}", token.describe()),
                    "Statements start with display, set, call, if, for, while, create, destroy, return, exit or define.",
                ));
                self.synchronize();
                continue;
            }

            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(error) => {
                    self.record(error);
                    self.synchronize();
                }
            }
        }

        statements
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let span = keyword.span();

        let stmt = match keyword.lexeme.to_ascii_lowercase().as_str() {
            "display" => self.display_statement(span)?,
            "set" => self.set_statement(span)?,
            "call" => self.call_statement(span)?,
            "if" => self.if_statement(span)?,
            "for" => self.for_statement(span)?,
            "while" => self.while_statement(span)?,
            "create" => Stmt::Create {
                target: self.place("create")?,
                span,
            },
            "destroy" => Stmt::Destroy {
                pointer: self.expression()?,
                span,
            },
            "return" => Stmt::Return {
                value: self.optional_expression()?,
                span,
            },
            "exit" => Stmt::Exit {
                code: self.optional_expression()?,
                span,
            },
            "define" => {
                let name = self.expect_identifier("variable name")?;
                let ty = self.type_spec()?;
                Stmt::VarDecl {
                    name: name.lexeme,
                    ty,
                    span,
                }
            }
            "increment" => self.step_statement(span, BinaryOp::Add, "increment")?,
            "decrement" => self.step_statement(span, BinaryOp::Subtract, "decrement")?,
            _ => {
                return Err(SyntaxError::new(
                    span,
                    format!("Expected statement, found {}", keyword.describe()),
                ))
            }
        };

        self.match_symbol(";");
        tracing::trace!(statement = stmt.name(), line = span.line, "parsed statement");
        Ok(stmt)
    }

    fn display_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let mut values = vec![self.expression().map_err(|error| {
            SyntaxError::with_help(
                error.span(),
                error.message,
                "display takes one or more comma separated expressions: display \"x =\", x",
            )
        })?];

        while self.match_symbol(",") {
            values.push(self.expression()?);
        }

        Ok(Stmt::Display { values, span })
    }

    fn set_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let target = self.place("set")?;
        self.expect_symbol_with_help(
            "=",
            "Expected '=' in set statement",
            "Assignments are written: set target = expression",
        )?;
        let value = self.expression()?;

        Ok(Stmt::Set {
            target,
            value,
            span,
        })
    }

    fn call_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let name = self.expect_identifier("function name after 'call'")?;

        let args = if self.match_kw("using") {
            self.arguments()?
        } else if self.match_symbol("(") {
            self.finish_arguments()?
        } else {
            Vec::new()
        };

        Ok(Stmt::Call {
            name: name.lexeme,
            args,
            span,
        })
    }

    fn if_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let condition = self.block_header("if", |parser| {
            let condition = parser.expression()?;
            parser.expect_kw_with_help(
                "then",
                "Expected 'then' after if condition",
                "If statements are written: if condition then ... [else ...] endif",
            )?;
            Ok(condition)
        })?;

        let then_branch = self.statement_list();
        let else_branch = if self.match_kw("else") {
            Some(self.statement_list())
        } else {
            None
        };

        self.expect_kw("endif", "Expected 'endif' to close if statement")?;

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    /// `for i = a to b [step s] do ... endfor`, lowered to an initializer,
    /// a pre-checked condition and a step statement.
    fn for_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let (variable, start, end, step) = self.block_header("for", |parser| {
            let variable = parser.expect_identifier("loop variable after 'for'")?;
            parser.expect_symbol("=", "Expected '=' after loop variable")?;
            let start = parser.expression()?;
            parser.expect_kw_with_help(
                "to",
                "Expected 'to' in for statement",
                "For loops are written: for i = 1 to 10 [step 1] do ... endfor",
            )?;
            let end = parser.expression()?;
            let step = if parser.match_kw("step") {
                Some(parser.expression()?)
            } else {
                None
            };
            parser.expect_kw("do", "Expected 'do' after for clauses")?;
            Ok((variable, start, end, step))
        })?;
        let counter = Expr::Identifier {
            name: variable.lexeme.clone(),
            span: variable.span(),
        };

        let body = self.statement_list();
        self.expect_kw("endfor", "Expected 'endfor' to close for statement")?;

        let descending = step.as_ref().map_or(false, is_negative_literal);
        let step = step.unwrap_or(Expr::Literal {
            value: Literal::Int(1),
            span,
        });

        Ok(Stmt::For {
            initializer: Box::new(Stmt::Set {
                target: counter.clone(),
                value: start,
                span,
            }),
            condition: Expr::Binary {
                left: Box::new(counter.clone()),
                operator: if descending {
                    BinaryOp::GreaterEqual
                } else {
                    BinaryOp::LessEqual
                },
                right: Box::new(end),
                span,
            },
            step: Box::new(Stmt::Set {
                target: counter.clone(),
                value: Expr::Binary {
                    left: Box::new(counter),
                    operator: BinaryOp::Add,
                    right: Box::new(step),
                    span,
                },
                span,
            }),
            body,
            span,
        })
    }

    fn while_statement(&mut self, span: Span) -> ParseResult<Stmt> {
        let condition = self.block_header("while", |parser| {
            let condition = parser.expression()?;
            parser.expect_kw_with_help(
                "do",
                "Expected 'do' after while condition",
                "While loops are written: while condition do ... endwhile",
            )?;
            Ok(condition)
        })?;

        let body = self.statement_list();
        self.expect_kw("endwhile", "Expected 'endwhile' to close while statement")?;

        Ok(Stmt::While {
            condition,
            body,
            span,
        })
    }

    /// `increment x` is `set x = x + 1`.
    fn step_statement(&mut self, span: Span, operator: BinaryOp, keyword: &str) -> ParseResult<Stmt> {
        let target = self.place(keyword)?;
        let value = Expr::Binary {
            left: Box::new(target.clone()),
            operator,
            right: Box::new(Expr::Literal {
                value: Literal::Int(1),
                span,
            }),
            span,
        };

        Ok(Stmt::Set {
            target,
            value,
            span,
        })
    }

    fn place(&mut self, keyword: &str) -> ParseResult<Expr> {
        let target = self.expression()?;
        if target.is_place() {
            Ok(target)
        } else {
            Err(SyntaxError::with_help(
                target.span(),
                format!("Invalid target for '{}'", keyword),
                "Targets are variables, fields (p->f, s.f), array elements (a[i]) or dereferences (p^).",
            ))
        }
    }

    fn optional_expression(&mut self) -> ParseResult<Option<Expr>> {
        if self.at_expression_start() {
            Ok(Some(self.expression()?))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn expression(&mut self) -> ParseResult<Expr> {
        self.or()
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.and()?;

        while self.match_symbol("||") || self.match_kw("or") {
            let operator_token = self.previous().clone();
            let right = self.operand(Self::and, &operator_token)?;
            expr = binary(expr, BinaryOp::Or, right);
        }

        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.equality()?;

        while self.match_symbol("&&") || self.match_kw("and") {
            let operator_token = self.previous().clone();
            let right = self.operand(Self::equality, &operator_token)?;
            expr = binary(expr, BinaryOp::And, right);
        }

        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.comparison()?;

        while self.match_symbols(&["==", "!="]) {
            let operator_token = self.previous().clone();
            let operator = match operator_token.lexeme.as_str() {
                "==" => BinaryOp::Equal,
                _ => BinaryOp::NotEqual,
            };
            let right = self.operand(Self::comparison, &operator_token)?;
            expr = binary(expr, operator, right);
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.term()?;

        while self.match_symbols(&["<", "<=", ">", ">="]) {
            let operator_token = self.previous().clone();
            let operator = match operator_token.lexeme.as_str() {
                "<" => BinaryOp::Less,
                "<=" => BinaryOp::LessEqual,
                ">" => BinaryOp::Greater,
                _ => BinaryOp::GreaterEqual,
            };
            let right = self.operand(Self::term, &operator_token)?;
            expr = binary(expr, operator, right);
        }

        Ok(expr)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut expr = self.factor()?;

        while self.match_symbols(&["+", "-"]) {
            let operator_token = self.previous().clone();
            let operator = match operator_token.lexeme.as_str() {
                "+" => BinaryOp::Add,
                _ => BinaryOp::Subtract,
            };
            let right = self.operand(Self::factor, &operator_token)?;
            expr = binary(expr, operator, right);
        }

        Ok(expr)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;

        while self.match_symbols(&["*", "/"]) {
            let operator_token = self.previous().clone();
            let operator = match operator_token.lexeme.as_str() {
                "*" => BinaryOp::Multiply,
                _ => BinaryOp::Divide,
            };
            let right = self.operand(Self::unary, &operator_token)?;
            expr = binary(expr, operator, right);
        }

        Ok(expr)
    }

    /// Right-hand operand of a binary operator, with a targeted message when
    /// it is missing.
    fn operand(
        &mut self,
        rule: fn(&mut Self) -> ParseResult<Expr>,
        operator_token: &Token,
    ) -> ParseResult<Expr> {
        if !self.at_expression_start() {
            return Err(SyntaxError::with_help(
                self.peek().span(),
                format!("Expected expression after '{}'", operator_token.lexeme),
                "Binary operators require expressions on both sides.",
            ));
        }
        rule(self)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.match_symbol("!") || self.match_kw("not") {
            let span = self.previous().span();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }

        if self.match_symbol("-") {
            let span = self.previous().span();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Negate,
                operand: Box::new(operand),
                span,
            });
        }

        if self.match_symbol("&") {
            let span = self.previous().span();
            let operand = self.unary()?;
            return Ok(Expr::AddressOf {
                operand: Box::new(operand),
                span,
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_symbol("->") {
                let field = self.expect_identifier("field name after '->'")?;
                let span = expr.span();
                expr = Expr::MemberAccess {
                    base: Box::new(expr),
                    field: field.lexeme,
                    span,
                };
            } else if self.match_symbol(".") {
                let field = self.expect_identifier("field name after '.'")?;
                let span = expr.span();
                expr = Expr::FieldAccess {
                    base: Box::new(expr),
                    field: field.lexeme,
                    span,
                };
            } else if self.match_symbol("[") {
                let index = self.expression()?;
                self.expect_symbol_with_help(
                    "]",
                    "Expected ']' after index",
                    "Array elements are written a[i].",
                )?;
                let span = expr.span();
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                    span,
                };
            } else if self.match_symbol("^") {
                let span = expr.span();
                expr = Expr::Deref {
                    operand: Box::new(expr),
                    span,
                };
            } else if self.check_symbol("(") {
                let Expr::Identifier { name, span } = expr else {
                    return Err(SyntaxError::new(
                        self.peek().span(),
                        "Only named functions can be called",
                    ));
                };
                self.advance();
                let args = self.finish_arguments()?;
                expr = Expr::Call { name, args, span };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = vec![self.expression()?];
        while self.match_symbol(",") {
            args.push(self.expression()?);
        }
        Ok(args)
    }

    /// Arguments after an opening '(' up to and including ')'.
    fn finish_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let args = if self.check_symbol(")") {
            Vec::new()
        } else {
            self.arguments()?
        };

        self.expect_symbol_with_help(
            ")",
            "Expected ')' after arguments",
            "Function calls must be closed with ')' after the arguments. Example: f(a, b)",
        )?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        let span = token.span();

        let literal = match token.kind {
            TokenKind::IntLiteral => Some(Literal::Int(token.lexeme.parse::<i64>().map_err(|_| {
                SyntaxError::new(span, format!("Integer literal '{}' is out of range", token.lexeme))
            })?)),
            TokenKind::RealLiteral => Some(Literal::Double(token.lexeme.parse::<f64>().map_err(
                |_| SyntaxError::new(span, format!("Invalid real literal '{}'", token.lexeme)),
            )?)),
            TokenKind::StringLiteral => Some(Literal::String(token.lexeme.clone())),
            TokenKind::Keyword if token.is_keyword("true") => Some(Literal::Bool(true)),
            TokenKind::Keyword if token.is_keyword("false") => Some(Literal::Bool(false)),
            TokenKind::Keyword if token.is_keyword("null") => Some(Literal::Null),
            _ => None,
        };

        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal { value, span });
        }

        if token.kind == TokenKind::Identifier {
            self.advance();
            return Ok(Expr::Identifier {
                name: token.lexeme,
                span,
            });
        }

        if token.is_symbol("(") {
            self.advance();

            if self.check_symbol(")") {
                return Err(SyntaxError::with_help(
                    span,
                    "Empty parentheses are not allowed",
                    "Parentheses must contain an expression: (x + 1)",
                ));
            }

            let expr = self.expression()?;
            self.expect_symbol_with_help(
                ")",
                "Expected ')' after expression",
                "Every opening parenthesis '(' must have a matching closing parenthesis ')'.",
            )?;
            return Ok(expr);
        }

        let help_msg = match token.kind {
            TokenKind::Eof => "Reached end of input while expecting an expression.",
            TokenKind::Error => "The scanner could not classify this input.",
            _ if token.is_symbol(")") => "Found ')' without matching '('. Check for unbalanced parentheses.",
            _ if token.is_symbol("]") => "Found ']' without matching '['. Check for unbalanced brackets.",
            _ => "Expected a literal value, variable, or parenthesized expression here.",
        };

        Err(SyntaxError::with_help(
            span,
            format!("Expected expression, found {}", token.describe()),
            help_msg,
        ))
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    fn record(&mut self, error: SyntaxError) {
        tracing::debug!(line = error.line, column = error.column, message = %error.message, "syntax error");
        self.errors.push(error);
    }

    /// Skip to the next statement keyword, block closer or end of input.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.at_statement_start() || self.at_block_end() {
                return;
            }
            self.advance();
        }
    }

    /// Parse the header of a block statement. When it fails the body can
    /// not be trusted, so skip past the matching closer before reporting.
    fn block_header<T>(
        &mut self,
        opener: &str,
        header: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        match header(self) {
            Ok(value) => Ok(value),
            Err(error) => {
                self.skip_block(opener);
                Err(error)
            }
        }
    }

    /// Skip to the closer matching an already consumed `opener` and consume
    /// it. Stops early at the end of the enclosing function.
    fn skip_block(&mut self, opener: &str) {
        let closer = format!("end{}", opener);
        let mut depth = 1;
        while !self.is_at_end() {
            if self.check_kw("endfun") || self.check_kw("function") || self.check_kw("implementations") {
                break;
            }
            if self.check_kw(opener) {
                depth += 1;
            } else if self.check_kw(&closer) {
                depth -= 1;
                if depth == 0 {
                    self.advance();
                    break;
                }
            }
            self.advance();
        }
        tracing::debug!(block = opener, line = self.peek().line, "skipped broken block");
    }

    fn synchronize_function(&mut self) {
        while !self.is_at_end() && !self.check_kw("function") {
            self.advance();
        }
    }

    fn synchronize_section(&mut self) {
        while !self.is_at_end() && !self.at_section_start() {
            self.advance();
        }
    }

    fn at_statement_start(&self) -> bool {
        STATEMENT_KEYWORDS.iter().any(|word| self.check_kw(word))
    }

    fn at_block_end(&self) -> bool {
        BLOCK_END_KEYWORDS.iter().any(|word| self.check_kw(word))
    }

    fn at_section_start(&self) -> bool {
        SECTION_KEYWORDS.iter().any(|word| self.check_kw(word))
    }

    /// A block closer that does not end a function body.
    fn at_stray_block_end(&self) -> bool {
        ["else", "endif", "endfor", "endwhile"]
            .iter()
            .any(|word| self.check_kw(word))
    }

    fn at_expression_start(&self) -> bool {
        let token = self.peek();
        match token.kind {
            TokenKind::IntLiteral
            | TokenKind::RealLiteral
            | TokenKind::StringLiteral
            | TokenKind::Identifier => true,
            TokenKind::Keyword => ["true", "false", "null", "not"]
                .iter()
                .any(|word| token.is_keyword(word)),
            TokenKind::Operator | TokenKind::Punctuation => {
                ["(", "-", "!", "&"].iter().any(|symbol| token.is_symbol(symbol))
            }
            TokenKind::Eof | TokenKind::Error => false,
        }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn check_kw(&self, word: &str) -> bool {
        self.peek().is_keyword(word)
    }

    fn match_kw(&mut self, word: &str) -> bool {
        if self.check_kw(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        self.peek().is_symbol(symbol)
    }

    fn match_symbol(&mut self, symbol: &str) -> bool {
        if self.check_symbol(symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_symbols(&mut self, symbols: &[&str]) -> bool {
        symbols.iter().any(|symbol| self.match_symbol(symbol))
    }

    fn expect_kw(&mut self, word: &str, message: &str) -> ParseResult<&Token> {
        if self.check_kw(word) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::new(
                self.peek().span(),
                format!("{}, found {}", message, self.peek().describe()),
            ))
        }
    }

    fn expect_kw_with_help(&mut self, word: &str, message: &str, help: &str) -> ParseResult<&Token> {
        if self.check_kw(word) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::with_help(
                self.peek().span(),
                format!("{}, found {}", message, self.peek().describe()),
                help,
            ))
        }
    }

    fn expect_symbol(&mut self, symbol: &str, message: &str) -> ParseResult<&Token> {
        if self.check_symbol(symbol) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::new(
                self.peek().span(),
                format!("{}, found {}", message, self.peek().describe()),
            ))
        }
    }

    fn expect_symbol_with_help(&mut self, symbol: &str, message: &str, help: &str) -> ParseResult<&Token> {
        if self.check_symbol(symbol) {
            Ok(self.advance())
        } else {
            Err(SyntaxError::with_help(
                self.peek().span(),
                format!("{}, found {}", message, self.peek().describe()),
                help,
            ))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> ParseResult<Token> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Identifier {
            self.advance();
            Ok(token)
        } else {
            Err(SyntaxError::new(
                token.span(),
                format!("Expected {}, found {}", what, token.describe()),
            ))
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

fn binary(left: Expr, operator: BinaryOp, right: Expr) -> Expr {
    let span = left.span();
    Expr::Binary {
        left: Box::new(left),
        operator,
        right: Box::new(right),
        span,
    }
}

fn literal_type(expr: &Expr) -> Option<TypeTag> {
    match expr {
        Expr::Literal { value, .. } => match value {
            Literal::Int(_) => Some(TypeTag::Integer),
            Literal::Double(_) => Some(TypeTag::Double),
            Literal::String(_) => Some(TypeTag::Text),
            Literal::Bool(_) => Some(TypeTag::Boolean),
            Literal::Null => None,
        },
        Expr::Unary {
            operator: UnaryOp::Negate,
            operand,
            ..
        } => match literal_type(operand)? {
            ty @ (TypeTag::Integer | TypeTag::Double) => Some(ty),
            _ => None,
        },
        _ => None,
    }
}

fn is_negative_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Literal {
            value: Literal::Int(n),
            ..
        } => *n < 0,
        Expr::Literal {
            value: Literal::Double(n),
            ..
        } => *n < 0.0,
        Expr::Unary {
            operator: UnaryOp::Negate,
            operand,
            ..
        } => matches!(operand.as_ref(), Expr::Literal { value: Literal::Int(_) | Literal::Double(_), .. }),
        _ => false,
    }
}

/// Parse a token sequence in one call.
pub fn parse(tokens: Vec<Token>) -> ParseOutput {
    Parser::new(tokens).parse()
}
