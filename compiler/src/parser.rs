// Parser for annotated function source.
//
// Parses a token stream (from the lexer) into a single `Function` AST.
// Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

type ParseError = Rich<'static, Token, SimpleSpan>;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub function: Option<Function>,
    pub errors: Vec<ParseError>,
}

/// Parse one function definition. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let (tokens, mut errors) = tokenize(source);
    let eoi: SimpleSpan = (source.len()..source.len()).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (function, parse_errors) = function_parser(source).parse(stream).into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult { function, errors }
}

/// Parse a standalone type annotation such as `Tuple[str, List[int]]`.
///
/// Used for annotations that arrive out of band (manifests, registrations).
pub fn parse_annotation(text: &str) -> Result<TypeExpr, Vec<ParseError>> {
    let (tokens, mut errors) = tokenize(text);
    let eoi: SimpleSpan = (text.len()..text.len()).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (annotation, parse_errors) = type_expr_parser(text).parse(stream).into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    match annotation {
        Some(annotation) if errors.is_empty() => Ok(annotation),
        _ => Err(errors),
    }
}

/// Lex `source` and convert spans for chumsky; lex errors become `Rich` errors.
fn tokenize(source: &str) -> (Vec<(Token, SimpleSpan)>, Vec<ParseError>) {
    let lex_result = crate::lexer::lex(source);

    let tokens = lex_result
        .tokens
        .into_iter()
        .map(|(tok, span)| (tok, (span.start..span.end).into()))
        .collect();
    let errors = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();

    (tokens, errors)
}

// ── Grammar ──
//
// Rules capture `source` once so identifiers can be sliced out of the input
// by span; tokens themselves carry no identifier text.

fn ident_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Ident, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    })
}

fn type_expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, TypeExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = ident_parser(source);
    recursive(|ty| {
        let generic_args = ty
            .separated_by(just(Token::Comma))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let named = ident
            .then(generic_args.or_not())
            .map_with(|(base, args), e| match args {
                Some(args) => TypeExpr::Generic {
                    base,
                    args,
                    span: e.span(),
                },
                None => TypeExpr::Name(base),
            });

        let ellipsis = just(Token::Ellipsis).map_with(|_, e| TypeExpr::Ellipsis(e.span()));

        named.or(ellipsis)
    })
}

fn function_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Function, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();
    let ident = ident_parser(source);
    let type_expr = type_expr_parser(source);

    // ── Expressions ──

    let expr = recursive(|expr| {
        let literal = select! {
            Token::Int(n) => Literal::Int(n),
            Token::Float(v) => Literal::Float(v),
            Token::Str(s) => Literal::Str(s),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
        }
        .map_with(|lit, e| Expr {
            kind: ExprKind::Literal(lit),
            span: e.span(),
        });

        let call_args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        // `a`, `a.b`, `a.b(args)`
        let path_expr = ident
            .clone()
            .separated_by(just(Token::Dot))
            .at_least(1)
            .collect::<Vec<_>>()
            .then(call_args.or_not())
            .map_with(|(mut path, args), e| {
                let kind = match args {
                    Some(args) => ExprKind::Call(Call { path, args }),
                    None if path.len() == 1 => ExprKind::Name(path.remove(0).name),
                    None => ExprKind::Attribute(path),
                };
                Expr {
                    kind,
                    span: e.span(),
                }
            });

        // `(x)` is a grouping, `(x,)` and `(x, y)` are tuples.
        let parenthesized = expr
            .clone()
            .then(
                just(Token::Comma)
                    .ignore_then(expr.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then(just(Token::Comma).or_not())
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|((first, rest), trailing), e| {
                if rest.is_empty() && trailing.is_none() {
                    return first;
                }
                let mut items = vec![first];
                items.extend(rest);
                Expr {
                    kind: ExprKind::Tuple(items),
                    span: e.span(),
                }
            });

        let atom = literal.or(path_expr).or(parenthesized);

        atom.clone()
            .then(
                just(Token::Plus)
                    .ignore_then(atom)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                rest.into_iter().fold(first, |l, r| {
                    let span: SimpleSpan = (l.span.start..r.span.end).into();
                    Expr {
                        kind: ExprKind::Add(Box::new(l), Box::new(r)),
                        span,
                    }
                })
            })
    });

    // Unparenthesised tuple on the right of `=` or after `return`.
    let expr_list = expr
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>()
        .map_with(|mut items, e| {
            if items.len() == 1 {
                items.remove(0)
            } else {
                Expr {
                    kind: ExprKind::Tuple(items),
                    span: e.span(),
                }
            }
        });

    // ── Statements ──

    let return_stmt = just(Token::Return)
        .ignore_then(expr_list.clone().or_not())
        .map(StmtKind::Return);

    let pass_stmt = just(Token::Pass).to(StmtKind::Pass);

    let ann_assign = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(type_expr.clone())
        .then(just(Token::Equals).ignore_then(expr_list.clone()).or_not())
        .map(|((target, annotation), value)| {
            StmtKind::AnnAssign(AnnAssign {
                target,
                annotation,
                value,
            })
        });

    let target = ident
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>()
        .map_with(|mut ids, e| {
            if ids.len() == 1 {
                Target::Name(ids.remove(0))
            } else {
                Target::Tuple(ids, e.span())
            }
        });

    let assign = target
        .then_ignore(just(Token::Equals))
        .then(expr_list.clone())
        .map(|(target, value)| StmtKind::Assign(Assign { target, value }));

    let expr_stmt = expr_list.map(StmtKind::Expr);

    let statement = choice((return_stmt, pass_stmt, ann_assign, assign, expr_stmt)).map_with(
        |kind, e| Stmt {
            kind,
            span: e.span(),
        },
    );

    let body = nl
        .clone()
        .ignore_then(
            statement
                .separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone());

    // ── def header ──

    let param = ident
        .clone()
        .then(just(Token::Colon).ignore_then(type_expr.clone()).or_not())
        .map(|(name, annotation)| Param { name, annotation });

    let params = param
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    nl.ignore_then(just(Token::Def))
        .ignore_then(ident)
        .then(params)
        .then(just(Token::Arrow).ignore_then(type_expr).or_not())
        .then_ignore(just(Token::Colon))
        .then(body)
        .map_with(|(((name, params), returns), body), e| Function {
            name,
            params,
            returns,
            body,
            span: e.span(),
        })
}

// ── Tests ──
