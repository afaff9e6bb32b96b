// ============================================================================
// Annotation scripting: Rhai-based sandboxed engine driving an EditorSession
// ============================================================================
//
// Scripts run synchronously on the calling thread against the live session.
// Every host function goes through the same session operations interactive
// editing uses, so crops and filters hit the same selection code path.

use rhai::{AST, Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, Scope};
use std::sync::{Arc, Mutex};

use crate::canvas::{Point, RegionRect, parse_hex_color};
use crate::components::history::{Annotation, BlurOp, MarkerOp, ShapeOp};
use crate::components::selection::SelectionPurpose;
use crate::components::tools::Tool;
use crate::ops::adjustments::FilterMode;
use crate::ops::text::HeadingLevel;
use crate::session::EditorSession;

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl ScriptError {
    fn located(message: String, pos: Position) -> Self {
        Self {
            message,
            line: pos.line().filter(|&l| l > 0),
            column: pos.position().filter(|&c| c > 0),
        }
    }

    /// Error explanation with line/column context and a hint.
    pub fn friendly_message(&self) -> String {
        let raw = &self.message;
        let cleaned = raw.split(" (line ").next().unwrap_or(raw);
        let mut parts = Vec::new();

        match (self.line, self.column) {
            (Some(line), Some(col)) => parts.push(format!("Error on line {}, column {}:", line, col)),
            (Some(line), None) => parts.push(format!("Error on line {}:", line)),
            _ => parts.push("Script error:".to_string()),
        }

        if raw.contains("Function not found:") {
            parts.push(format!("  {}", cleaned));
            parts.push(String::new());
            parts.push("  Tip: check the spelling and argument count. Coordinates take".to_string());
            parts.push("  four numbers: arrow(x1, y1, x2, y2).".to_string());
        } else if raw.contains("Variable not found:") {
            parts.push(format!("  {}", cleaned));
            parts.push(String::new());
            parts.push("  Tip: declare variables with 'let' before using them.".to_string());
        } else if raw.contains("Too many operations") {
            parts.push("  Script exceeded the maximum operation limit.".to_string());
            parts.push(String::new());
            parts.push("  Tip: your script may contain an infinite loop.".to_string());
        } else {
            parts.push(format!("  {}", cleaned));
        }
        parts.join("\n")
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let (Some(line), Some(col)) = (self.line, self.column) {
            write!(f, "Line {}, Col {}: {}", line, col, self.message)
        } else if let Some(line) = self.line {
            write!(f, "Line {}: {}", line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ScriptError {}

// ============================================================================
// Script context: shared mutable state between engine and host functions
// ============================================================================

struct ScriptContext {
    session: EditorSession,
    console_output: Vec<String>,
}

type SharedContext = Arc<Mutex<ScriptContext>>;
type HostResult<T = ()> = Result<T, Box<EvalAltResult>>;

fn num(d: &Dynamic, what: &str) -> HostResult<f32> {
    if let Ok(i) = d.as_int() {
        return Ok(i as f32);
    }
    if let Ok(f) = d.as_float() {
        return Ok(f as f32);
    }
    Err(format!("{what}: expected a number, got {}", d.type_name()).into())
}

fn point(x: &Dynamic, y: &Dynamic) -> HostResult<Point> {
    Ok(Point::new(num(x, "x")?, num(y, "y")?))
}

fn rect(x: &Dynamic, y: &Dynamic, w: &Dynamic, h: &Dynamic) -> HostResult<RegionRect> {
    Ok(RegionRect::new(num(x, "x")?, num(y, "y")?, num(w, "width")?, num(h, "height")?))
}

/// Run `f` against the session, turning editor errors into script errors.
fn with_session<T>(
    ctx: &SharedContext,
    f: impl FnOnce(&mut EditorSession) -> crate::error::Result<T>,
) -> HostResult<T> {
    let mut lock = ctx.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut lock.session).map_err(|e| e.to_string().into())
}

// ============================================================================
// Engine construction with full sandbox + API registration
// ============================================================================

fn create_engine(ctx: SharedContext) -> Engine {
    let mut engine = Engine::new();

    // ── Sandbox limits ──
    engine.set_max_operations(50_000_000);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(1_000);

    register_canvas_api(&mut engine, ctx.clone());
    register_style_api(&mut engine, ctx.clone());
    register_shape_api(&mut engine, ctx.clone());
    register_region_api(&mut engine, ctx.clone());
    register_utility_api(&mut engine, ctx);

    engine
}

fn register_canvas_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("width", move || -> i64 {
        let lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.session.document().map_or(0, |d| d.width() as i64)
    });

    let c = ctx;
    engine.register_fn("height", move || -> i64 {
        let lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.session.document().map_or(0, |d| d.height() as i64)
    });
}

fn register_style_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("set_color", move |hex: ImmutableString| -> HostResult {
        let color = parse_hex_color(hex.as_str()).ok_or_else(|| format!("invalid color '{}'", hex))?;
        let mut lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.session.tools.props.color = color;
        Ok(())
    });

    let c = ctx;
    engine.register_fn("set_width", move |w: Dynamic| -> HostResult {
        let w = num(&w, "width")?;
        if w.is_nan() || w <= 0.0 {
            return Err("stroke width must be positive".into());
        }
        let mut lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.session.tools.props.stroke_width = w;
        Ok(())
    });
}

fn register_shape_api(engine: &mut Engine, ctx: SharedContext) {
    type Build = fn(ShapeOp) -> Annotation;
    let shapes: [(&str, Build); 5] = [
        ("arrow", Annotation::Arrow),
        ("line", Annotation::Line),
        ("rect", Annotation::Rectangle),
        ("ellipse", Annotation::Ellipse),
        ("highlight", Annotation::Highlight),
    ];
    for (name, build) in shapes {
        let c = ctx.clone();
        engine.register_fn(
            name,
            move |x1: Dynamic, y1: Dynamic, x2: Dynamic, y2: Dynamic| -> HostResult {
                let start = point(&x1, &y1)?;
                let end = point(&x2, &y2)?;
                if start == end {
                    return Err(format!("{name}: start and end are the same point").into());
                }
                with_session(&c, |s| {
                    let props = &s.tools.props;
                    let op = build(ShapeOp {
                        start,
                        end,
                        color: props.color,
                        stroke_width: props.stroke_width,
                    });
                    s.push_operation(op)
                })
            },
        );
    }

    let c = ctx.clone();
    engine.register_fn("marker", move |coords: Array| -> HostResult {
        if coords.len() < 2 || coords.len() % 2 != 0 {
            return Err("marker: expected [x, y, x, y, ...]".into());
        }
        let points = coords
            .chunks(2)
            .map(|xy| point(&xy[0], &xy[1]))
            .collect::<HostResult<Vec<Point>>>()?;
        with_session(&c, |s| {
            let op = Annotation::Marker(MarkerOp {
                points,
                color: s.tools.props.color,
                stroke_width: s.tools.props.stroke_width,
            });
            s.push_operation(op)
        })
    });

    let c = ctx.clone();
    engine.register_fn("text", move |x: Dynamic, y: Dynamic, content: ImmutableString| -> HostResult {
        let at = point(&x, &y)?;
        with_session(&c, |s| {
            let op = s.tools.text_op(Tool::Text, at, content.as_str())?;
            s.push_operation(op)
        })
    });

    let c = ctx;
    engine.register_fn(
        "heading",
        move |x: Dynamic, y: Dynamic, content: ImmutableString, level: i64| -> HostResult {
            let at = point(&x, &y)?;
            with_session(&c, |s| {
                s.tools.props.heading_level = HeadingLevel::from_number(level);
                let op = s.tools.text_op(Tool::Heading, at, content.as_str())?;
                s.push_operation(op)
            })
        },
    );
}

fn register_region_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn(
        "blur",
        move |x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic, block: i64| -> HostResult {
            let rect = rect(&x, &y, &w, &h)?.normalized();
            if rect.is_empty() {
                return Err("blur: region is empty".into());
            }
            with_session(&c, |s| {
                s.push_operation(Annotation::PixelBlur(BlurOp {
                    rect,
                    block_size: block.clamp(1, u32::MAX as i64) as u32,
                }))
            })
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "filter",
        move |x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic, mode: ImmutableString| -> HostResult {
            let rect = rect(&x, &y, &w, &h)?;
            with_session(&c, |s| {
                s.tools.props.filter_mode = FilterMode::from_name(mode.as_str());
                s.select_and_apply(SelectionPurpose::Filter, rect)
            })
        },
    );

    let c = ctx;
    engine.register_fn(
        "crop",
        move |x: Dynamic, y: Dynamic, w: Dynamic, h: Dynamic| -> HostResult {
            let rect = rect(&x, &y, &w, &h)?;
            with_session(&c, |s| s.select_and_apply(SelectionPurpose::Crop, rect))
        },
    );
}

fn register_utility_api(engine: &mut Engine, ctx: SharedContext) {
    let c = ctx.clone();
    engine.register_fn("undo", move || -> bool {
        let mut lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.session.undo()
    });

    let c = ctx.clone();
    engine.register_fn("clear", move || -> HostResult {
        with_session(&c, |s| s.clear_all(&mut |_: &str| true))
    });

    let c = ctx.clone();
    engine.register_fn(
        "paste_file",
        move |path: ImmutableString, x: Dynamic, y: Dynamic| -> HostResult {
            let at = point(&x, &y)?;
            let bytes = std::fs::read(path.as_str()).map_err(|e| format!("paste_file '{}': {}", path, e))?;
            with_session(&c, |s| s.paste_bytes_at(bytes, at.x, at.y).map(|_| ()))
        },
    );

    let c = ctx;
    engine.register_fn("print_line", move |msg: Dynamic| {
        let line = msg.to_string();
        tracing::info!("[script] {}", line);
        let mut lock = c.lock().unwrap_or_else(|e| e.into_inner());
        lock.console_output.push(line);
    });
}

// ============================================================================
// Public execution API
// ============================================================================

/// Compile a script and return the AST, or a ScriptError.
pub fn compile_script(source: &str) -> Result<AST, ScriptError> {
    let engine = Engine::new();
    engine
        .compile(source)
        .map_err(|e| ScriptError::located(e.to_string(), e.position()))
}

/// Run `source` against `session` on the calling thread. Returns the
/// console output. Edits made before an error stay applied.
pub fn run_script(session: &mut EditorSession, source: &str) -> Result<Vec<String>, ScriptError> {
    let ctx = Arc::new(Mutex::new(ScriptContext {
        session: std::mem::take(session),
        console_output: Vec::new(),
    }));

    let engine = create_engine(ctx.clone());
    let mut scope = Scope::new();
    let outcome = engine
        .compile(source)
        .map_err(|e| ScriptError::located(e.to_string(), e.position()))
        .and_then(|ast| {
            engine
                .run_ast_with_scope(&mut scope, &ast)
                .map_err(|e| ScriptError::located(e.to_string(), e.position()))
        });
    drop(engine);

    let mut lock = ctx.lock().unwrap_or_else(|e| e.into_inner());
    *session = std::mem::take(&mut lock.session);
    let console = std::mem::take(&mut lock.console_output);
    match outcome {
        Ok(()) => Ok(console),
        Err(e) => {
            tracing::error!("Script failed: {}", e);
            Err(e)
        }
    }
}
