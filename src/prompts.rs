//! Prompt text sent to the completion API.

use crate::session::SessionState;

pub const NICKNAME_SYSTEM_PROMPT: &str = "당신은 창의적이고 웃긴 별명 생성 전문가입니다.
사용자의 좋아하는 것과 현재 상황을 기반으로, 다음 조건에 따라 별명을 만들어주세요:

1. 창의적이고 웃긴 별명 3~5개를 제시하세요
2. 각 별명마다 왜 그렇게 지었는지 간단한 설명을 해주세요
3. 한글로 작성하세요
4. 별명들은 사용자의 개성과 현재 상황을 잘 반영하되, 긍정적이고 재미있어야 합니다
5. 별명 제시 후, 선택된 별명으로 사용자와 친근하게 대화를 시작하세요

마치 친한 친구처럼 따뜻하고 재미있는 톤으로 대화해주세요.";

const CHAT_BASE_PROMPT: &str = "당신은 친근하고 재미있는 친구 같은 챗봇입니다.";

pub fn nickname_user_prompt(interests: &str, situation: &str) -> String {
    format!(
        "내가 좋아하는 것: {interests}\n\n지금의 상황: {situation}\n\n\
         이를 바탕으로 나에게 어울리는 창의적이고 웃긴 별명을 만들어줄래?"
    )
}

/// System prompt for chat turns, built from whatever profile the session has.
pub fn chat_system_prompt(state: &SessionState) -> String {
    let mut profile = Vec::new();
    if let Some(nickname) = state.nickname() {
        profile.push(format!("사용자의 별명은 '{nickname}'입니다."));
    }
    if let Some(interests) = state.interests() {
        profile.push(format!("사용자가 좋아하는 것: {interests}"));
    }
    if let Some(situation) = state.situation() {
        profile.push(format!("사용자의 현재 상황: {situation}"));
    }

    if profile.is_empty() {
        return format!("{CHAT_BASE_PROMPT} 사용자와 따뜻한 대화를 나누세요.");
    }

    let mut prompt = format!("{CHAT_BASE_PROMPT}\n{}\n\n", profile.join("\n"));
    prompt.push_str(
        "이 정보를 바탕으로 사용자와 따뜻하고 재미있는 대화를 나누세요.\n\
         인스타그램 감성으로 긍정적이고 응원하는 톤으로 대화해주세요.",
    );
    if state.nickname().is_some() {
        prompt.push_str("\n사용자의 별명을 적절히 사용하여 더욱 친근하게 느껴지도록 하세요.");
    } else {
        prompt.push_str("\n앞서 제안한 별명 중 하나를 골라 친근하게 불러주세요.");
    }
    prompt
}
