use std::sync::Arc;

use stemblend_core::{
    Flow, SessionController, TrackSlot,
    fixtures::{RecordingBackend, demo_session},
};
use tokio::sync::mpsc;

fn controller(
    input: mpsc::Receiver<String>,
) -> (
    SessionController<RecordingBackend, Vec<u8>>,
    Arc<RecordingBackend>,
) {
    let backend = Arc::new(RecordingBackend::default());
    let controller = SessionController::new(demo_session(), Arc::clone(&backend), input, Vec::new());
    (controller, backend)
}

fn printed(controller: &SessionController<RecordingBackend, Vec<u8>>) -> String {
    String::from_utf8(controller.output().clone()).expect("shell output should be utf-8")
}

#[tokio::test]
async fn commands_print_results_and_errors_without_stopping() {
    let (_sender, receiver) = mpsc::channel(4);
    let (mut controller, _) = controller(receiver);

    for line in ["pitch1 3", "/volume2 150", "split 2", "place 1:1 at", "dance", ""] {
        assert_eq!(
            controller.execute_line(line).await.expect("output should be writable"),
            Flow::Continue
        );
    }
    assert_eq!(
        controller.execute_line("quit").await.expect("output should be writable"),
        Flow::Exit
    );

    let output = printed(&controller);
    assert!(output.contains("Track 1 pitch: +3 semitones"), "{output}");
    assert!(output.contains("Track 2 volume: 150%"), "{output}");
    assert!(
        output.contains("Error: track 2 is not vocal type. Switch to vocal first using 'type2 vocal'"),
        "{output}"
    );
    assert!(
        output.contains("Error: usage: place <track:segment> at <time>"),
        "{output}"
    );
    assert!(
        output.contains("Unknown command: dance. Type 'help' for available commands."),
        "{output}"
    );
    assert_eq!(controller.session().adjustment(TrackSlot::One).pitch_semitones(), 3);
}

#[tokio::test]
async fn run_greets_prompts_and_exits() {
    let (sender, receiver) = mpsc::channel(4);
    for line in ["status", "auto-match", "exit", "pitch1 5"] {
        sender
            .send(line.to_string())
            .await
            .expect("channel should accept input");
    }
    let (mut controller, _) = controller(receiver);

    controller.run().await.expect("shell should run to exit");

    let output = printed(&controller);
    assert!(output.starts_with("=== Blend Shell ==="), "{output}");
    assert!(output.contains("Commands:"), "{output}");
    assert!(output.contains("blend> "), "{output}");
    assert!(output.contains("Auto-match complete!"), "{output}");
    assert!(output.trim_end().ends_with("Exiting blend shell..."), "{output}");
    assert_eq!(controller.session().adjustment(TrackSlot::One).pitch_semitones(), -5);
}

#[tokio::test]
async fn closed_input_ends_the_loop() {
    let (sender, receiver) = mpsc::channel(1);
    drop(sender);
    let (mut controller, _) = controller(receiver);

    controller.run().await.expect("shell should stop on closed input");
    assert!(printed(&controller).contains("Exiting blend shell..."));
}

#[tokio::test]
async fn play_returns_to_idle_on_the_next_line() {
    let (sender, receiver) = mpsc::channel(4);
    sender
        .send(String::new())
        .await
        .expect("channel should accept input");
    let (mut controller, backend) = controller(receiver);

    assert_eq!(
        controller.execute_line("play 30").await.expect("output should be writable"),
        Flow::Continue
    );

    let output = printed(&controller);
    assert!(
        output.contains("Playing blend with 0+0 active segments from 30.0s/30.0s for 150.0s"),
        "{output}"
    );
    assert!(output.contains("Playback stopped."), "{output}");
    assert!(output.contains("Mix saved to"), "{output}");
    assert_eq!(backend.recorded().len(), 1);

    assert_eq!(
        controller.execute_line("play -3").await.expect("output should be writable"),
        Flow::Continue
    );
    assert!(printed(&controller).contains("Error: invalid argument: start position must not be negative"));
}
