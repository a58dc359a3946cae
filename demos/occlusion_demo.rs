use ndarray::array;
use octrack::{create_tracker, Bbox, Detection, TrackOutput};
use std::collections::HashMap;

fn print_tracks(title: &str, tracks: &[TrackOutput]) {
    println!("\n{title}: {} tracks", tracks.len());
    for track in tracks {
        println!("  Track ID {}: {} conf {:.2}", track.track_id, track.bbox, track.confidence);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("Tracking two objects through a short occlusion...");

    let params: HashMap<String, String> = [("min_hits", "1"), ("max_age", "5")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut tracker = create_tracker("OC_SORT", &params)?;

    // Frames 1-3: both objects move right by 10 pixels per frame
    for frame in 0..3 {
        let dx = 10.0 * frame as f32;
        let detections = [
            Detection::new(Bbox::new(10.0 + dx, 10.0, 50.0 + dx, 50.0), 0.9, 0, 0),
            Detection::new(Bbox::new(200.0 + dx, 100.0, 240.0 + dx, 150.0), 0.8, 1, 1),
        ];
        let tracks = tracker.update(&detections)?;
        print_tracks(&format!("Frame {}", frame + 1), &tracks);
    }

    // Frames 4-5: the first object is hidden
    for frame in 3..5 {
        let dx = 10.0 * frame as f32;
        let detections = [Detection::new(
            Bbox::new(200.0 + dx, 100.0, 240.0 + dx, 150.0),
            0.8,
            1,
            0,
        )];
        let tracks = tracker.update(&detections)?;
        print_tracks(&format!("Frame {} (object 1 occluded)", frame + 1), &tracks);
    }

    // Frame 6: it reappears where its motion says it should be
    let detections = [
        Detection::new(Bbox::new(60.0, 10.0, 100.0, 50.0), 0.9, 0, 0),
        Detection::new(Bbox::new(250.0, 100.0, 290.0, 150.0), 0.8, 1, 1),
    ];
    let tracks = tracker.update(&detections)?;
    print_tracks("Frame 6 (object 1 back)", &tracks);
    println!("Live tracks: {}", tracker.num_tracklets());

    // The array interface, as used by pipeline integrations
    let mut array_tracker = octrack::OcSortTracker::from_params(&params)?;
    let frame = array![
        [10.0, 10.0, 50.0, 50.0, 0.9, 0.0],
        [100.0, 100.0, 150.0, 150.0, 0.8, 2.0],
    ];
    let rows = array_tracker.update_array(frame.view());
    println!("\nArray output [x1, y1, x2, y2, id, class, conf, idx]:");
    for row in rows.outer_iter() {
        println!("  {row}");
    }

    Ok(())
}
