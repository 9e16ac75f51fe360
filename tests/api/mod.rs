mod chat_tests;
mod health_tests;
mod room_tests;
