use std::time::Duration;

use image::{Rgba, RgbaImage};
use shotmark::components::history::{BlurOp, FilterOp, ShapeOp};
use shotmark::error::Result;
use shotmark::ops::adjustments::FilterMode;
use shotmark::ops::clipboard::PastePayload;
use shotmark::preferences::EditorSettings;
use shotmark::{Annotation, EditorError, EditorSession, Point, PointerOutcome, RegionRect, SelectionPurpose, Tool};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

fn session_with(img: RgbaImage) -> EditorSession {
    let mut s = EditorSession::default();
    s.load_image(img);
    s
}

fn white(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_pixel(w, h, WHITE)
}

fn arrow(x1: f32, y1: f32, x2: f32, y2: f32) -> Annotation {
    Annotation::Arrow(ShapeOp {
        start: Point::new(x1, y1),
        end: Point::new(x2, y2),
        color: [0, 0, 0, 255],
        stroke_width: 3.0,
    })
}

fn png(img: &RgbaImage) -> Vec<u8> {
    shotmark::io::encode_png(img).unwrap()
}

fn drag(s: &mut EditorSession, from: Point, to: Point) -> PointerOutcome {
    s.pointer_down(from);
    s.pointer_move(Point::midpoint(from, to));
    s.pointer_move(to);
    s.pointer_up(to)
}

// ---------------------------------------------------------------------------
//  Compositing properties
// ---------------------------------------------------------------------------

#[test]
fn rendering_is_idempotent() {
    let mut s = session_with(white(120, 90));
    s.push_operation(arrow(10.0, 10.0, 100.0, 70.0)).unwrap();
    s.push_operation(Annotation::PixelBlur(BlurOp {
        rect: RegionRect::new(0.0, 0.0, 60.0, 60.0),
        block_size: 7,
    }))
    .unwrap();
    let ops = s.operations().to_vec();
    let doc = s.document_mut().unwrap();
    let a = doc.render(&ops);
    let b = doc.render(&ops);
    assert_eq!(a, b);
    assert_eq!(&a, s.composite().unwrap());
}

#[test]
fn operation_order_matters() {
    let arrow_op = arrow(5.0, 30.0, 55.0, 30.0);
    let blur_op = Annotation::PixelBlur(BlurOp {
        rect: RegionRect::new(0.0, 0.0, 60.0, 60.0),
        block_size: 10,
    });
    let mut s = session_with(white(60, 60));
    let doc = s.document_mut().unwrap();
    let drawn_then_blurred = doc.render(&[arrow_op.clone(), blur_op.clone()]);
    let blurred_then_drawn = doc.render(&[blur_op, arrow_op]);
    assert_ne!(drawn_then_blurred, blurred_then_drawn);
}

#[test]
fn undo_matches_rendering_without_last_op() {
    let a = arrow(10.0, 10.0, 80.0, 10.0);
    let b = arrow(10.0, 40.0, 80.0, 60.0);
    let mut s = session_with(white(100, 80));
    s.push_operation(a.clone()).unwrap();
    s.push_operation(b).unwrap();
    assert!(s.undo());
    let expected = s.document_mut().unwrap().render(&[a]);
    assert_eq!(s.composite().unwrap(), &expected);

    assert!(s.undo());
    assert!(!s.undo());
    assert_eq!(s.composite().unwrap(), &white(100, 80));
}

#[test]
fn pixelation_uses_floor_mean() {
    let mut img = RgbaImage::new(2, 1);
    img.put_pixel(0, 0, Rgba([10, 0, 255, 200]));
    img.put_pixel(1, 0, Rgba([13, 1, 0, 100]));
    let mut s = session_with(img);
    s.push_operation(Annotation::PixelBlur(BlurOp {
        rect: RegionRect::new(0.0, 0.0, 2.0, 1.0),
        block_size: 2,
    }))
    .unwrap();
    let out = s.composite().unwrap();
    assert_eq!(out.get_pixel(0, 0), &Rgba([11, 0, 127, 200]));
    assert_eq!(out.get_pixel(1, 0), &Rgba([11, 0, 127, 100]));
}

#[test]
fn grayscale_uses_luma_weights() {
    let mut s = session_with(RgbaImage::from_pixel(4, 4, Rgba([200, 100, 50, 255])));
    s.push_operation(Annotation::ColorFilter(FilterOp {
        rect: RegionRect::new(0.0, 0.0, 4.0, 4.0),
        mode: FilterMode::Grayscale,
    }))
    .unwrap();
    assert_eq!(s.composite().unwrap().get_pixel(2, 2), &Rgba([124, 124, 124, 255]));
}

#[test]
fn full_grayscale_of_pure_red() {
    let mut s = session_with(RgbaImage::from_pixel(100, 100, Rgba([255, 0, 0, 255])));
    s.tools.props.filter_mode = FilterMode::Grayscale;
    s.select_and_apply(SelectionPurpose::Filter, RegionRect::new(0.0, 0.0, 100.0, 100.0))
        .unwrap();
    let out = s.composite().unwrap();
    assert!(out.pixels().all(|p| *p == Rgba([76, 76, 76, 255])));
    assert!(s.document().unwrap().filter.rect().is_none());
}

#[test]
fn arrow_has_shaft_and_two_heads() {
    let mut s = session_with(white(200, 200));
    s.push_operation(arrow(50.0, 100.0, 150.0, 100.0)).unwrap();
    let out = s.composite().unwrap();
    let dark = |x: u32, y: u32| out.get_pixel(x, y)[0] < 128;

    assert!(dark(100, 100), "shaft");
    // Heads end 15px back from the tip at ±30°: (137.0, 92.5) and (137.0, 107.5).
    assert!(dark(143, 96), "upper head");
    assert!(dark(143, 103), "lower head");
    assert!(dark(138, 93));
    assert!(!dark(130, 88), "nothing past the head length");
    assert!(!dark(100, 80));
}

// ---------------------------------------------------------------------------
//  Selection
// ---------------------------------------------------------------------------

#[test]
fn reverse_drag_selection_is_normalized() {
    let mut s = session_with(white(100, 100));
    s.set_tool(Tool::Crop);
    let out = drag(&mut s, Point::new(50.0, 50.0), Point::new(10.0, 10.0));
    assert_eq!(
        out,
        PointerOutcome::SelectionReady {
            purpose: SelectionPurpose::Crop,
            rect: RegionRect::new(10.0, 10.0, 40.0, 40.0),
        }
    );
    s.apply_selection(SelectionPurpose::Crop).unwrap();
    assert_eq!(s.document().unwrap().width(), 40);
}

#[test]
fn crop_is_clamped_to_the_canvas() {
    let mut s = session_with(white(100, 100));
    s.select_and_apply(SelectionPurpose::Crop, RegionRect::new(80.0, 70.0, 50.0, 50.0))
        .unwrap();
    let doc = s.document().unwrap();
    assert_eq!((doc.width(), doc.height()), (20, 30));
}

#[test]
fn crop_bakes_annotations_and_clears_history() {
    let mut s = session_with(white(100, 100));
    s.push_operation(arrow(0.0, 50.0, 100.0, 50.0)).unwrap();
    s.select_and_apply(SelectionPurpose::Crop, RegionRect::new(20.0, 40.0, 40.0, 20.0))
        .unwrap();
    assert!(s.operations().is_empty());
    let doc = s.document().unwrap();
    assert!(doc.surface.base().get_pixel(10, 10)[0] < 128);
    assert!(!s.undo());
}

#[test]
fn too_small_crop_warns_and_keeps_selection() {
    let mut s = session_with(white(100, 100));
    s.set_tool(Tool::Crop);
    let out = drag(&mut s, Point::new(10.0, 10.0), Point::new(15.0, 15.0));
    assert!(matches!(out, PointerOutcome::Warning(_)));
    assert!(matches!(
        s.apply_selection(SelectionPurpose::Crop),
        Err(EditorError::SelectionTooSmall { .. })
    ));
    assert!(s.document().unwrap().crop.rect().is_some());
    assert_eq!(s.document().unwrap().width(), 100);
}

// ---------------------------------------------------------------------------
//  Tools
// ---------------------------------------------------------------------------

#[test]
fn shape_drag_commits_one_operation() {
    let mut s = session_with(white(100, 100));
    s.set_tool(Tool::Rectangle);
    let out = drag(&mut s, Point::new(10.0, 10.0), Point::new(60.0, 50.0));
    assert!(matches!(out, PointerOutcome::Committed(_)));
    assert_eq!(s.operations().len(), 1);
    assert!(matches!(s.operations()[0], Annotation::Rectangle(_)));
}

#[test]
fn preview_never_touches_history() {
    let mut s = session_with(white(100, 100));
    s.set_tool(Tool::Line);
    s.pointer_down(Point::new(10.0, 10.0));
    s.pointer_move(Point::new(90.0, 90.0));
    assert!(s.operations().is_empty());
    assert_ne!(s.composite().unwrap(), &white(100, 100));
    s.pointer_leave(Point::new(90.0, 90.0));
    assert_eq!(s.operations().len(), 1);
}

#[test]
fn text_entry_flow() {
    let mut s = session_with(white(200, 100));
    s.set_tool(Tool::Text);
    let out = s.pointer_down(Point::new(20.0, 20.0));
    assert!(matches!(out, PointerOutcome::TextEntryRequested { tool: Tool::Text, .. }));
    assert!(matches!(s.submit_text("   "), Err(EditorError::EmptyText)));
    assert!(s.operations().is_empty());

    s.pointer_down(Point::new(20.0, 20.0));
    s.submit_text("Look here").unwrap();
    assert!(matches!(s.operations()[0], Annotation::Text(_)));
}

#[test]
fn history_limit_flattens() {
    let settings = EditorSettings {
        max_history: 2,
        ..EditorSettings::default()
    };
    let mut s = EditorSession::new(settings);
    s.load_image(white(50, 50));
    for i in 0..3 {
        s.push_operation(arrow(5.0, 5.0 + i as f32 * 10.0, 45.0, 5.0 + i as f32 * 10.0))
            .unwrap();
    }
    assert!(s.operations().is_empty());
    assert!(s.document().unwrap().surface.base().get_pixel(25, 25)[0] < 128);
}

// ---------------------------------------------------------------------------
//  Paste
// ---------------------------------------------------------------------------

#[test]
fn pasted_image_is_centered_and_not_upscaled() {
    let mut s = session_with(white(1000, 1000));
    let blue = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 255, 255]));
    let id = s.paste(&PastePayload::image("image/png", png(&blue))).unwrap().unwrap();

    match &s.operations()[0] {
        Annotation::PastedImage(p) => {
            assert_eq!(p.id, id);
            assert_eq!(p.placement, RegionRect::new(400.0, 400.0, 200.0, 200.0));
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(s.wait_for_decodes(Duration::from_secs(10)), 1);
    let out = s.composite().unwrap();
    assert_eq!(out.get_pixel(500, 500), &Rgba([0, 0, 255, 255]));
    assert_eq!(out.get_pixel(399, 500), &WHITE);
}

#[test]
fn non_image_payload_is_ignored() {
    let mut s = session_with(white(10, 10));
    let payload = PastePayload::image("text/plain", b"hello".to_vec());
    assert_eq!(s.paste(&payload).unwrap(), None);
    assert!(s.operations().is_empty());
}

#[test]
fn undecodable_paste_adds_nothing() {
    let mut s = session_with(white(10, 10));
    let payload = PastePayload::image("image/png", b"definitely not png".to_vec());
    assert!(s.paste(&payload).is_err());
    assert!(s.operations().is_empty());
}

#[test]
fn stale_decode_is_dropped_after_crop() {
    let mut s = session_with(white(300, 300));
    let red = RgbaImage::from_pixel(50, 50, Rgba([255, 0, 0, 255]));
    s.paste(&PastePayload::image("image/png", png(&red))).unwrap();
    s.select_and_apply(SelectionPurpose::Crop, RegionRect::new(0.0, 0.0, 200.0, 200.0))
        .unwrap();

    assert_eq!(s.wait_for_decodes(Duration::from_secs(10)), 0);
    assert!(s.operations().is_empty());
    assert!(s.composite().unwrap().pixels().all(|p| *p == WHITE));
}

#[test]
fn pasted_image_can_be_dragged() {
    let mut s = session_with(white(1000, 1000));
    let blue = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 255, 255]));
    s.paste(&PastePayload::image("image/png", png(&blue))).unwrap();
    s.wait_for_decodes(Duration::from_secs(10));

    s.set_tool(Tool::Arrow);
    drag(&mut s, Point::new(500.0, 500.0), Point::new(600.0, 500.0));
    assert_eq!(s.operations().len(), 1);
    match &s.operations()[0] {
        Annotation::PastedImage(p) => assert_eq!(p.placement.x, 550.0),
        other => panic!("unexpected {other:?}"),
    }
}

// ---------------------------------------------------------------------------
//  Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn capture_failure_keeps_previous_state() {
    let mut s = session_with(white(30, 30));
    s.push_operation(arrow(1.0, 1.0, 20.0, 20.0)).unwrap();
    let mut failing = || -> Result<Vec<u8>> { Err(EditorError::Capture("no display".into())) };
    assert!(matches!(s.capture(&mut failing), Err(EditorError::Capture(_))));
    assert_eq!(s.operations().len(), 1);

    let mut garbage = || -> Result<Vec<u8>> { Ok(b"nope".to_vec()) };
    assert!(s.capture(&mut garbage).is_err());
    assert_eq!(s.document().unwrap().width(), 30);
}

#[test]
fn capture_names_the_file() {
    let mut s = EditorSession::default();
    let shot = png(&white(8, 8));
    let mut source = move || -> Result<Vec<u8>> { Ok(shot.clone()) };
    s.capture(&mut source).unwrap();
    assert!(s.is_editing());
    assert!(s.file_name().starts_with("screenshot-"));
    assert!(!s.file_name().contains(':'));
}

#[test]
fn export_resets_on_success_only() {
    let mut s = session_with(white(20, 20));
    s.set_file_name("bug-report");
    s.push_operation(arrow(1.0, 10.0, 19.0, 10.0)).unwrap();

    let mut failing = |_: &[u8], _: &str, _: bool| -> Result<String> { Err(EditorError::Export("disk full".into())) };
    assert!(matches!(s.export(&mut failing, true), Err(EditorError::Export(_))));
    assert!(s.is_editing());
    assert_eq!(s.operations().len(), 1);

    let mut saved = Vec::new();
    let mut sink = |bytes: &[u8], path: &str, _: bool| -> Result<String> {
        saved.push((bytes.to_vec(), path.to_string()));
        Ok("id-1".to_string())
    };
    assert_eq!(s.export(&mut sink, false).unwrap(), "id-1");
    assert!(!s.is_editing());
    assert!(s.operations().is_empty());

    let (bytes, path) = &saved[0];
    assert_eq!(path, "screenshots/bug-report.png");
    let decoded = shotmark::io::decode_image(bytes).unwrap();
    assert!(decoded.get_pixel(10, 10)[0] < 128);
}

#[test]
fn destructive_actions_need_confirmation() {
    let mut s = session_with(white(20, 20));
    s.push_operation(arrow(1.0, 10.0, 19.0, 10.0)).unwrap();

    let mut decline = |_: &str| -> bool { false };
    assert!(matches!(s.clear_all(&mut decline), Err(EditorError::Cancelled)));
    assert!(matches!(s.cancel(&mut decline), Err(EditorError::Cancelled)));
    assert_eq!(s.operations().len(), 1);

    let mut prompts = Vec::new();
    let mut accept = |msg: &str| -> bool {
        prompts.push(msg.to_string());
        true
    };
    s.clear_all(&mut accept).unwrap();
    assert!(s.operations().is_empty());
    assert_eq!(prompts, vec![shotmark::session::CONFIRM_CLEAR.to_string()]);

    // Empty sessions close without asking.
    s.cancel(&mut decline).unwrap();
    assert!(!s.is_editing());
}

#[test]
fn project_file_restores_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work.smk");

    let mut s = session_with(white(64, 64));
    s.push_operation(arrow(4.0, 32.0, 60.0, 32.0)).unwrap();
    s.paste_bytes_at(png(&RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]))), 2.0, 2.0)
        .unwrap();
    s.save_project(&path).unwrap();
    let expected = s.composite().unwrap().clone();

    let mut restored = EditorSession::default();
    restored.load_project(&path).unwrap();
    assert_eq!(restored.operations().len(), 2);
    assert_eq!(restored.composite().unwrap(), &expected);
}
