use iocraft::prelude::*;
use tokio::sync::watch;

const PROGRESS_COLUMNS: usize = 40;

#[derive(Default, Props)]
pub struct ErrorMessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &ErrorMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "✗ ")
            Text(content: &props.message)
        }
    }
}

#[derive(Default, Props)]
pub struct SuccessMessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &SuccessMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "✓ ")
            Text(content: &props.message)
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "┌ ")
            View(background_color: Color::Blue) {
                Text(content: "revup configuration", color: Color::White)
            }
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.description.as_ref().map(|description| element! {
                Text(content: description.clone())
            }))
            View(flex_direction: FlexDirection::Row) {
                Text(weight: Weight::Bold, content: props.prompt.clone())
                #(props.default.as_ref().map(|default| element! {
                    Text(content: format!(" [{}]", default))
                }))
            }
        }
    }
}

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub title: String,
    pub progress: Option<watch::Receiver<f32>>,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0f32);
    let receiver = props.progress.clone();

    hooks.use_future(async move {
        if let Some(mut receiver) = receiver {
            loop {
                percent.set(*receiver.borrow());
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }
    });

    let current = percent.get().clamp(0.0, 100.0);
    let filled = (current / 100.0 * PROGRESS_COLUMNS as f32) as usize;

    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: format!("{} ", props.title))
            Text(color: Color::Cyan, content: "█".repeat(filled))
            Text(content: "░".repeat(PROGRESS_COLUMNS - filled))
            Text(content: format!(" {:>5.1}%", current))
        }
    }
}
