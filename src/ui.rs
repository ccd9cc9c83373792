//! Terminal rendering for the mixer UI.
//!
//! One bordered block per group with a gauge row per client. Errors and
//! connection problems are drawn as centered modals over the mixer view.

use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Gauge, Paragraph, Wrap};
use ratatui::Frame;

use snapmix::models::{Client, Group};
use snapmix::rpc::ConnectionState;

use crate::app::App;

const FOCUS_STYLE: Style = Style::new().fg(Color::Yellow);

pub fn draw(frame: &mut Frame, app: &App) {
    let groups = app.server.sorted_groups();

    if groups.is_empty() {
        let placeholder = Paragraph::new("no groups reported by server")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(placeholder, frame.area());
    } else {
        // Each group gets its client rows plus the surrounding border.
        let constraints: Vec<Constraint> = groups
            .iter()
            .map(|g| Constraint::Length(g.clients.len() as u16 + 2))
            .collect();
        let areas = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(frame.area());

        let name_width = groups
            .iter()
            .flat_map(|g| g.sorted_clients())
            .map(|c| c.display_name().chars().count())
            .max()
            .unwrap_or(0);

        for (group, area) in groups.iter().zip(areas.iter()) {
            draw_group(frame, app, group, name_width, *area);
        }
    }

    if let Some(error) = app.errors.last() {
        draw_modal(
            frame,
            "error",
            &format!("{error}\n\n(esc to dismiss)"),
            Color::Red,
        );
    } else if app.connection != ConnectionState::Open {
        let message = match app.connection {
            ConnectionState::Connecting => "connecting...",
            ConnectionState::Faulted => "connection lost\n\n(q to quit)",
            _ => "disconnected\n\n(q to quit)",
        };
        draw_modal(frame, "connection", message, Color::Yellow);
    }
}

fn draw_group(frame: &mut Frame, app: &App, group: &Group, name_width: usize, area: Rect) {
    let focused = app.focus.as_deref() == Some(group.id.as_str());
    let mute_marker = if group.muted { " [M]" } else { "" };

    let mut block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .title(format!(" {}{} ", group.display_name(), mute_marker));
    if focused {
        block = block.border_style(FOCUS_STYLE).title_style(FOCUS_STYLE);
    }
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let clients = group.sorted_clients();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(1); clients.len()])
        .split(inner);

    for (client, row) in clients.iter().zip(rows.iter()) {
        draw_client(frame, app, client, name_width, *row);
    }
}

fn draw_client(frame: &mut Frame, app: &App, client: &Client, name_width: usize, area: Rect) {
    let focused = app.focus.as_deref() == Some(client.id.as_str());
    let volume = client.config.volume;

    let label_width = (name_width + 4).min(area.width as usize) as u16;
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(label_width), Constraint::Min(0)])
        .split(area);

    let name_style = if focused {
        FOCUS_STYLE.add_modifier(Modifier::BOLD)
    } else if !client.connected {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    let mute_marker = if volume.muted {
        Span::styled("M", Style::default().fg(Color::Red))
    } else {
        Span::raw(" ")
    };
    let label = Line::from(vec![
        Span::styled(format!("{:>name_width$}", client.display_name()), name_style),
        Span::raw(" "),
        mute_marker,
        Span::raw(" "),
    ]);
    frame.render_widget(Paragraph::new(label), columns[0]);

    let gauge_color = if volume.muted {
        Color::DarkGray
    } else if focused {
        Color::Yellow
    } else {
        Color::Green
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(gauge_color).bg(Color::Black))
        .ratio(f64::from(volume.percent.min(100)) / 100.0)
        .label(format!("{:>3}%", volume.percent));
    frame.render_widget(gauge, columns[1]);
}

fn draw_modal(frame: &mut Frame, title: &str, message: &str, color: Color) {
    let area = centered_rect(frame.area(), 60, 30);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(color))
        .title(format!(" {title} "));
    let body = Paragraph::new(message)
        .block(block)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    frame.render_widget(Clear, area);
    frame.render_widget(body, area);
}

fn centered_rect(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);
    horizontal[1]
}
