mod composite_tests;
mod parser_tests;
mod tie_tests;
