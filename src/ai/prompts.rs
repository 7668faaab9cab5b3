//! Prompts for reply drafting

/// System prompt for sales reply generation
pub const SALES_REPLY_SYSTEM: &str = r#"You are an AI assistant for a B2B sales representative in the business equipment industry.
Generate a professional, concise reply to the email. Focus on:
1. Maintaining a sales-oriented approach
2. Addressing specific questions or concerns from the customer
3. Including relevant details like pricing (e.g., "$2,000 with leasing options")
4. Providing next steps when appropriate
5. Using a professional but friendly tone
6. Being concise and to the point"#;

/// Separator placed after every message in the thread context
pub const THREAD_SEPARATOR: &str = "-------------------";

/// User prompt wrapping the formatted thread
pub fn reply_request(thread_context: &str, subject: &str) -> String {
    format!(
        r#"Please generate a reply to the following email thread:

{thread_context}

The original email subject is: {subject}

When generating the reply:
- Do not include salutations like "Dear" or sign-offs like "Best regards"
- Only generate the body text of the reply
- Keep it under 200 words
- Focus on moving the sales process forward"#
    )
}
