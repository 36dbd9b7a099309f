use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::{App, InputMode, ModelSelection};
use crate::transcript::ChatRole;

const OFFLINE_NOTICE: &str = "You are offline. Some features may not be available.";

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("**") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("**") else {
            break;
        };
        if close == 0 {
            // "****" is not emphasis
            spans.push(Span::raw(rest[..open + 4].to_string()));
            rest = &after_open[2..];
            continue;
        }
        if open > 0 {
            spans.push(Span::raw(rest[..open].to_string()));
        }
        spans.push(Span::styled(
            after_open[..close].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let banner_height = if app.banner_visible() { 1 } else { 0 };

    // Main layout: banner, header, transcript, input, footer
    let [banner_area, header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(banner_height),
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    if banner_height > 0 {
        render_banner(frame, banner_area);
    }
    render_header(app, frame, header_area);
    render_transcript(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_banner(frame: &mut Frame, area: Rect) {
    let banner = Paragraph::new(Line::from(vec![
        Span::raw(OFFLINE_NOTICE),
        Span::styled("  (x to dismiss)", Style::default().add_modifier(Modifier::DIM)),
    ]))
    .centered()
    .style(Style::default().bg(Color::Red).fg(Color::White));
    frame.render_widget(banner, area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let model_style = match app.models {
        ModelSelection::Loading => Style::default().fg(Color::Gray).italic(),
        ModelSelection::Ready { .. } => Style::default().fg(Color::Green),
        ModelSelection::Failed(_) => Style::default().fg(Color::Red).bold(),
    };

    let mut spans = vec![
        Span::styled(" Chatllama ", Style::default().fg(Color::Red).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" Model: "),
        Span::styled(app.model_label().to_string(), model_style),
    ];
    if let ModelSelection::Failed(reason) = &app.models {
        spans.push(Span::styled(format!(" ({})", reason), Style::default().fg(Color::DarkGray)));
    }
    spans.push(Span::styled(
        format!("  {}", app.ollama.base_url()),
        Style::default().fg(Color::DarkGray),
    ));
    let title = Line::from(spans);

    let header = Paragraph::new(title).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    // Stored for scroll math and mouse hit-testing (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let border_color = if app.input_mode == InputMode::Normal { Color::Cyan } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chat ");

    let text = if app.transcript.is_empty() {
        Text::from(Span::styled(
            "Type a prompt below and press Enter.",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let in_progress = app.transcript.len() - 1;
        let mut lines: Vec<Line> = Vec::new();

        for (i, msg) in app.transcript.iter().enumerate() {
            match msg.role {
                ChatRole::User => {
                    lines.push(Line::from(Span::styled(
                        "You:",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    )));
                    for line in msg.content.lines() {
                        lines.push(Line::from(line.to_string()));
                    }
                }
                ChatRole::Assistant => {
                    lines.push(Line::from(Span::styled(
                        "AI:",
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    )));
                    if msg.content.is_empty() {
                        let placeholder = if i == in_progress && app.transcript.is_streaming() {
                            // Animated ellipsis: cycles through ".", "..", "..."
                            format!("Thinking{}", ".".repeat(app.animation_frame as usize + 1))
                        } else {
                            "(no response)".to_string()
                        };
                        lines.push(Line::from(Span::styled(
                            placeholder,
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    }
                    for line in msg.content.lines() {
                        lines.push(parse_markdown_line(line));
                    }
                }
            }
            lines.push(Line::default());
        }

        Text::from(lines)
    };

    // measured without the block so the count is in inner-width lines
    let chat = Paragraph::new(text).wrap(Wrap { trim: false });
    app.set_rendered_lines(chat.line_count(app.chat_width));
    let chat = chat.block(block).scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.is_generating() { " Prompt (generating...) " } else { " Prompt " };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Horizontal scrolling keeps the cursor inside the box
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else {
        app.cursor.saturating_sub(inner_width.saturating_sub(1))
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = if app.input.is_empty() && !editing {
        Paragraph::new(Span::styled("Type your prompt...", Style::default().fg(Color::DarkGray)))
    } else {
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan))
    };

    frame.render_widget(input.block(block), area);

    if editing {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" EDIT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::styled(" ", label_style),
    ];

    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!(" {} ", status),
            Style::default().bg(Color::Black).fg(Color::LightRed),
        ));
    } else {
        let hints: &[(&str, &str)] = match app.input_mode {
            InputMode::Editing => &[(" Enter ", " send "), (" Esc ", " stop typing ")],
            InputMode::Normal if app.is_generating() => &[
                (" Esc ", " cancel "),
                (" j/k ", " scroll "),
                (" i ", " type "),
                (" q ", " quit "),
            ],
            InputMode::Normal => &[
                (" i ", " type "),
                (" j/k ", " scroll "),
                (" g/G ", " top/bottom "),
                (" M ", " model "),
                (" q ", " quit "),
            ],
        };
        for (key, label) in hints {
            spans.push(Span::styled(*key, key_style));
            spans.push(Span::styled(*label, label_style));
        }
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let ModelSelection::Ready { models, selected } = &app.models else {
        return;
    };

    // Calculate popup size and position (centered)
    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = (models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (Enter to select, Esc to cancel) ");

    let items: Vec<ListItem> = models
        .iter()
        .enumerate()
        .map(|(i, model)| {
            let style = if i == *selected {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", model.name)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    fn span_texts(line: &Line) -> Vec<String> {
        line.spans.iter().map(|s| s.content.to_string()).collect()
    }

    #[test]
    fn test_markdown_bold() {
        let line = parse_markdown_line("a **bold** move");
        assert_eq!(span_texts(&line), vec!["a ", "bold", " move"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_markdown_unclosed_is_literal() {
        let line = parse_markdown_line("2 ** 3 is eight");
        assert_eq!(span_texts(&line), vec!["2 ** 3 is eight"]);
    }

    #[test]
    fn test_markdown_multibyte() {
        let line = parse_markdown_line("**é**ü");
        assert_eq!(span_texts(&line), vec!["é", "ü"]);
    }

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn test_word_wrapped_reply_tail_is_on_screen() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(Config::default(), tx);
        app.on_models_loaded(Ok(vec![crate::ollama::ModelDescriptor {
            name: "llama3.2:latest".to_string(),
            model: "llama3.2:latest".to_string(),
        }]));
        app.input = "story".to_string();
        let (id, _) = app.begin_exchange().unwrap();
        let reply = format!("{}ZZZEND", "abcdefghijklm ".repeat(30));
        app.on_fragment(id, &reply);

        let mut terminal = Terminal::new(TestBackend::new(22, 12)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        assert!(app.follow);
        assert!(buffer_text(&terminal).contains("ZZZEND"));

        // scrolling by hand reaches the same bottom
        app.scroll_to_top();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        assert!(!buffer_text(&terminal).contains("ZZZEND"));
        app.scroll_down(u16::MAX);
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        assert!(buffer_text(&terminal).contains("ZZZEND"));
    }

    #[test]
    fn test_render_shows_banner_and_loading_model() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = App::new(Config::default(), tx);
        app.on_connectivity(crate::connectivity::Connectivity::Offline);

        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|frame| render(&mut app, frame)).unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("You are offline"));
        assert!(text.contains("Loading..."));

        app.dismiss_banner();
        app.on_models_loaded(Err("refused".to_string()));
        terminal.draw(|frame| render(&mut app, frame)).unwrap();
        let text = buffer_text(&terminal);
        assert!(!text.contains("You are offline"));
        assert!(text.contains("Error"));
    }
}
