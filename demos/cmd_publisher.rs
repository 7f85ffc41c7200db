// Keyboard teleop: Space walk/stop, W/S forward speed, A/D turn, arrows head,
// H head home, 1-9 play action, G get up, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use legged_motion_runtime::catalog::ActionIndex;
use legged_motion_runtime::config::TOPIC_CMD_MOTION;
use legged_motion_runtime::messages::MotionCommand;

const FORWARD_STEP: i32 = 5;
const TURN_STEP: i32 = 5;
const MAX_FORWARD: i32 = 30;
const MAX_TURN: i32 = 25;
const HEAD_STEP: i32 = 10;
const RAMP_MS: u32 = 200; // smooth forward speed changes
const KEEPALIVE_MS: u64 = 300; // Resend velocity while walking to feed the watchdog

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOTION).await?;

    info!("Controls: Space=walk/stop, W/S=speed, A/D=turn, arrows=head, H=home, 1-9=action, G=get up, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &MotionCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Persistent teleop state
    let mut walking = false;
    let mut forward = 0;
    let mut turn = 0;
    let mut head = (0, 0);
    let mut last_velocity_sent = Instant::now();

    loop {
        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                if !pressed {
                    continue;
                }

                let cmd = match code {
                    KeyCode::Char(' ') => {
                        walking = !walking;
                        if walking {
                            Some(MotionCommand::StartWalk)
                        } else {
                            forward = 0;
                            turn = 0;
                            Some(MotionCommand::StopWalk)
                        }
                    }

                    // Gait speed
                    KeyCode::Char('w') => {
                        forward = (forward + FORWARD_STEP).min(MAX_FORWARD);
                        Some(MotionCommand::SetVelocity { forward, turn, ramp_ms: RAMP_MS })
                    }
                    KeyCode::Char('s') => {
                        forward = (forward - FORWARD_STEP).max(-MAX_FORWARD);
                        Some(MotionCommand::SetVelocity { forward, turn, ramp_ms: RAMP_MS })
                    }
                    KeyCode::Char('a') => {
                        turn = (turn + TURN_STEP).min(MAX_TURN);
                        Some(MotionCommand::SetVelocity { forward, turn, ramp_ms: 0 })
                    }
                    KeyCode::Char('d') => {
                        turn = (turn - TURN_STEP).max(-MAX_TURN);
                        Some(MotionCommand::SetVelocity { forward, turn, ramp_ms: 0 })
                    }

                    // Head
                    KeyCode::Left | KeyCode::Right | KeyCode::Up | KeyCode::Down => {
                        match code {
                            KeyCode::Left => head.0 += HEAD_STEP,
                            KeyCode::Right => head.0 -= HEAD_STEP,
                            KeyCode::Up => head.1 += HEAD_STEP,
                            _ => head.1 -= HEAD_STEP,
                        }
                        Some(MotionCommand::AimHead { x: head.0, y: head.1, return_home: false })
                    }
                    KeyCode::Char('h') => {
                        head = (0, 0);
                        Some(MotionCommand::AimHead { x: 0, y: 0, return_home: true })
                    }

                    // Actions stop the gait
                    KeyCode::Char(c @ '1'..='9') => {
                        walking = false;
                        let index = ActionIndex::from(c.to_digit(10).unwrap_or(1));
                        Some(MotionCommand::PerformAction { index, audio: None })
                    }
                    KeyCode::Char('g') => {
                        walking = false;
                        Some(MotionCommand::RecoverFromFall)
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc => {
                        send(publisher, &MotionCommand::StopWalk).await?;
                        break;
                    }

                    _ => None,
                };

                if let Some(cmd) = cmd {
                    info!("{:?}", cmd);
                    if matches!(cmd, MotionCommand::SetVelocity { .. }) {
                        last_velocity_sent = Instant::now();
                    }
                    send(publisher, &cmd).await?;
                }
            }
        }

        // Keep the watchdog fed while walking
        if walking && last_velocity_sent.elapsed() > Duration::from_millis(KEEPALIVE_MS) {
            let cmd = MotionCommand::SetVelocity { forward, turn, ramp_ms: 0 };
            send(publisher, &cmd).await?;
            last_velocity_sent = Instant::now();
        }
    }

    Ok(())
}
