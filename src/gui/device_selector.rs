use std::{io::stdout, path::PathBuf, time::Duration};

use crate::gui::error::SelectorError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

enum Step {
    Stay,
    Pick,
    Quit,
}

fn on_key(code: KeyCode, cursor: &mut usize, n_ports: usize) -> Step {
    match code {
        KeyCode::Down | KeyCode::Char('j') => {
            *cursor = (*cursor + 1) % n_ports;
            Step::Stay
        }
        KeyCode::Up | KeyCode::Char('k') => {
            *cursor = (*cursor + n_ports - 1) % n_ports;
            Step::Stay
        }
        KeyCode::Enter => Step::Pick,
        KeyCode::Char('q') | KeyCode::Esc => Step::Quit,
        _ => Step::Stay,
    }
}

/// Let the user pick the peer's serial device from `available_ports`.
/// Returns `None` if they quit without choosing.
pub fn device_selector(
    mut available_ports: Vec<PathBuf>,
) -> Result<Option<PathBuf>, SelectorError> {
    if available_ports.is_empty() {
        return Err(SelectorError::NoDevices);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let selected = run_selector(&available_ports);
    // Restore the terminal even if drawing failed
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(selected?.map(|i| available_ports.swap_remove(i)))
}

fn run_selector(available_ports: &[PathBuf]) -> Result<Option<usize>, SelectorError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let n_ports = available_ports.len();
    let mut cursor = 0;
    let mut list_state = ListState::default().with_selected(Some(cursor));
    loop {
        let title = Title::from(" Select the emotion peer ".magenta().bold());
        let instructions = Title::from(Line::from(vec![
            " Navigate ".into(),
            "<Up>/<Down>".magenta().bold(),
            " Select ".into(),
            "<Enter>".magenta().bold(),
            " Quit ".into(),
            "<Q> ".magenta().bold(),
        ]));
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .title(
                instructions
                    .alignment(Alignment::Center)
                    .position(Position::Bottom),
            )
            .borders(Borders::ALL);
        let port_names = available_ports.iter().map(|p| p.to_string_lossy());
        let list = List::new(port_names)
            .style(Style::default().fg(Color::White))
            .highlight_symbol(">>")
            .highlight_style(Style::default().fg(Color::Magenta))
            .block(block);
        list_state.select(Some(cursor));
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_stateful_widget(list, area, &mut list_state);
        })?;

        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match on_key(key.code, &mut cursor, n_ports) {
                        Step::Stay => {}
                        Step::Pick => return Ok(Some(cursor)),
                        Step::Quit => return Ok(None),
                    }
                }
            }
        }
    }
}
